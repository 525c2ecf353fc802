//! Narrow hierarchical-file interface used by the NeXus sink.
//!
//! The sink only needs a handful of operations on a tree of groups and
//! datasets addressed by `/`-separated paths relative to the file root
//! (`""` is the root itself). Two backends implement them:
//!
//! - [`tree::TreeBackend`] (`"nxjson"`): the whole tree serialized as JSON,
//!   replaced atomically on commit. Always available.
//! - `hdf5::Hdf5Backend` (`"hdf5"`): real HDF5 files via `hdf5-metno`.
//!   Requires the `storage_hdf5` feature and a native HDF5 installation.
//!
//! A handle is opened per sink call and committed before it is dropped; a
//! handle dropped without [`HierarchicalFile::commit`] leaves the file as it
//! was for the tree backend.

#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod tree;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dataset payload. Scalars are stored as one-element arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetValue {
    Float(#[serde(with = "float_array")] Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    /// Fixed-capacity string; `capacity >= value.len()`.
    Text { value: String, capacity: usize },
}

impl DatasetValue {
    /// Text dataset with room for `slack` more bytes than `value` needs.
    pub fn text(value: impl Into<String>, slack: usize) -> Self {
        let value = value.into();
        let capacity = value.len() + slack;
        DatasetValue::Text { value, capacity }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DatasetValue::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            DatasetValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            DatasetValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// Float arrays that survive JSON: non-finite values are written as the
/// strings `"NaN"`, `"Infinity"` and `"-Infinity"`. A `null` reads back as NaN.
mod float_array {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(Option<f64>),
        Named(String),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&v| {
            if v.is_finite() {
                Encoded::Number(Some(v))
            } else if v.is_nan() {
                Encoded::Named("NaN".to_string())
            } else if v > 0.0 {
                Encoded::Named("Infinity".to_string())
            } else {
                Encoded::Named("-Infinity".to_string())
            }
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Encoded>::deserialize(deserializer)?
            .into_iter()
            .map(|item| match item {
                Encoded::Number(v) => Ok(v.unwrap_or(f64::NAN)),
                Encoded::Named(name) => match name.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "Infinity" => Ok(f64::INFINITY),
                    "-Infinity" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("invalid float '{other}'"))),
                },
            })
            .collect()
    }
}

/// Group attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            AttrValue::List(_) => None,
        }
    }

    /// Items of a list attribute; a single text value counts as one item.
    pub fn items(&self) -> Vec<String> {
        match self {
            AttrValue::Text(v) => vec![v.clone()],
            AttrValue::List(v) => v.clone(),
        }
    }
}

/// An open hierarchical file.
pub trait HierarchicalFile {
    /// Names of the child groups of `path`.
    ///
    /// The JSON tree lists them in creation order, HDF5 in natural name
    /// order. Callers that need entry order sort by suffix themselves.
    fn member_groups(&self, path: &str) -> Result<Vec<String>>;

    /// Whether a group or dataset exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Create the group at `path` and any missing parents.
    fn require_group(&mut self, path: &str) -> Result<()>;

    /// Create or replace the dataset at `path`, creating missing parents.
    ///
    /// Replacing never fails on a shape or type change. A text dataset keeps
    /// its capacity when the new value fits, and backends overwrite in place
    /// whenever the stored type allows it.
    fn write_dataset(&mut self, path: &str, value: &DatasetValue) -> Result<()>;

    fn read_dataset(&self, path: &str) -> Result<DatasetValue>;

    /// Attribute of the group at `path`, `None` if unset.
    fn attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>>;

    /// Set (overwrite) an attribute on the group at `path`.
    fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()>;

    /// Make the changes durable and release the file.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Opens files of one storage format.
pub trait FileBackend: Send + Sync {
    /// Short format name (`"nxjson"`, `"hdf5"`).
    fn name(&self) -> &'static str;

    /// Default file extension, without the dot.
    fn extension(&self) -> &'static str;

    /// Create an empty file at `path`, truncating anything already there.
    fn create(&self, path: &Path) -> Result<()>;

    /// Open `path` for appending, creating it if missing.
    fn open(&self, path: &Path) -> Result<Box<dyn HierarchicalFile>>;
}

/// Join two store paths.
pub fn join(parent: &str, child: &str) -> String {
    match (parent.trim_matches('/'), child.trim_matches('/')) {
        ("", child) => child.to_string(),
        (parent, "") => parent.to_string(),
        (parent, child) => format!("{parent}/{child}"),
    }
}

/// Path components, ignoring empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split a path into its parent and last component.
pub fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_matches('/');
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}
