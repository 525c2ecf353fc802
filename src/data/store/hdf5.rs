//! HDF5 backend (feature `storage_hdf5`).
//!
//! Numeric datasets are 1-D, chunked and resizable, so rewriting a key with
//! the same element type resizes and overwrites it in place. Text datasets
//! are fixed-length UTF-8 strings whose capacity is rounded up to one of
//! [`TEXT_CAPACITIES`]; a shorter or equal value is written into the existing
//! dataset. Only a type change, or text outgrowing its capacity, replaces the
//! dataset.
//!
//! Groups are listed in natural name order (`entry2` before `entry10`).
//! Attribute lists are 1-D arrays of variable-length strings.

use super::{segments, split_parent, AttrValue, DatasetValue, FileBackend, HierarchicalFile};
use anyhow::{anyhow, bail, Context, Result};
use hdf5::types::{FixedUnicode, H5Type, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use std::path::Path;

/// Chunk length of resizable numeric datasets.
const CHUNK: usize = 256;

/// Byte capacities available for text datasets.
pub const TEXT_CAPACITIES: [usize; 5] = [64, 256, 1024, 4096, 16384];

/// Run `$body` with `$n` bound as a const to one of [`TEXT_CAPACITIES`].
macro_rules! with_text_capacity {
    ($capacity:expr, $n:ident => $body:expr) => {
        match $capacity {
            64 => {
                const $n: usize = 64;
                $body
            }
            256 => {
                const $n: usize = 256;
                $body
            }
            1024 => {
                const $n: usize = 1024;
                $body
            }
            4096 => {
                const $n: usize = 4096;
                $body
            }
            16384 => {
                const $n: usize = 16384;
                $body
            }
            other => bail!("unsupported text capacity {other}"),
        }
    };
}

/// Smallest available capacity holding `needed` bytes.
fn text_capacity(needed: usize) -> Result<usize> {
    TEXT_CAPACITIES
        .iter()
        .copied()
        .find(|&capacity| capacity >= needed)
        .ok_or_else(|| anyhow!("text of {needed} bytes exceeds the largest HDF5 capacity"))
}

/// Sort key putting numeric suffixes in numeric order.
fn natural_key(name: &str) -> (&str, Option<u64>, &str) {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (stem, number) = name.split_at(name.len() - digits);
    (stem, number.parse().ok(), name)
}

pub struct Hdf5File {
    file: File,
}

impl Hdf5File {
    fn group(&self, path: &str) -> Result<Group> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(self.file.as_group()?);
        }
        self.file
            .group(path)
            .with_context(|| format!("group '{path}' does not exist"))
    }

    fn vivify(&self, path: &str) -> Result<Group> {
        let mut group = self.file.as_group()?;
        for part in segments(path) {
            group = if group.link_exists(part) {
                group.group(part)?
            } else {
                group.create_group(part)?
            };
        }
        Ok(group)
    }
}

/// Existing dataset `name` if `fits` accepts it.
///
/// A dataset that does not fit is unlinked so the caller can recreate it.
fn reusable(
    group: &Group,
    name: &str,
    fits: impl Fn(&Dataset, &TypeDescriptor) -> bool,
) -> Result<Option<Dataset>> {
    if !group.link_exists(name) {
        return Ok(None);
    }
    if group.group(name).is_ok() {
        bail!("'{name}' is a group, not a dataset");
    }
    let ds = group.dataset(name)?;
    if fits(&ds, &ds.dtype()?.to_descriptor()?) {
        return Ok(Some(ds));
    }
    group.unlink(name)?;
    Ok(None)
}

fn write_numeric<T: H5Type>(group: &Group, name: &str, values: &[T]) -> Result<()> {
    let target = T::type_descriptor();
    let existing = reusable(group, name, |ds, found| {
        *found == target && ds.is_resizable() && ds.ndim() == 1
    })?;
    let ds = match existing {
        Some(ds) => ds,
        None => group
            .new_dataset::<T>()
            .shape((0..,))
            .chunk((CHUNK,))
            .create(name)?,
    };
    ds.resize((values.len(),))?;
    if !values.is_empty() {
        ds.write(values)?;
    }
    Ok(())
}

fn write_text(group: &Group, name: &str, value: &str, capacity: usize) -> Result<()> {
    let existing = reusable(group, name, |_, found| {
        matches!(found, TypeDescriptor::FixedUnicode(n) if *n >= value.len())
    })?;
    let (ds, capacity) = match existing {
        Some(ds) => match ds.dtype()?.to_descriptor()? {
            TypeDescriptor::FixedUnicode(n) => (ds, n),
            other => bail!("unexpected text type {other:?} at '{name}'"),
        },
        None => {
            let capacity = text_capacity(capacity.max(value.len()))?;
            let ds = with_text_capacity!(capacity, N => group
                .new_dataset::<FixedUnicode<N>>()
                .shape([1])
                .create(name)?);
            (ds, capacity)
        }
    };
    with_text_capacity!(capacity, N => {
        let text = value
            .parse::<FixedUnicode<N>>()
            .map_err(|e| anyhow!("string not storable in HDF5: {e}"))?;
        ds.write(&[text][..])?;
    });
    Ok(())
}

fn read_text(ds: &Dataset, capacity: usize) -> Result<String> {
    let text = with_text_capacity!(capacity, N => ds
        .read_raw::<FixedUnicode<N>>()?
        .into_iter()
        .next()
        .map(|s| s.as_str().to_string()));
    Ok(text.unwrap_or_default())
}

fn unicode(text: &str) -> Result<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|e| anyhow!("string not storable in HDF5: {e}"))
}

impl HierarchicalFile for Hdf5File {
    fn member_groups(&self, path: &str) -> Result<Vec<String>> {
        let group = self.group(path)?;
        let mut names: Vec<String> = group
            .member_names()?
            .into_iter()
            .filter(|name| group.group(name).is_ok())
            .collect();
        names.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
        Ok(names)
    }

    fn exists(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return true;
        }
        let mut current = String::new();
        for part in segments(path) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            if !self.file.link_exists(&current) {
                return false;
            }
        }
        true
    }

    fn require_group(&mut self, path: &str) -> Result<()> {
        self.vivify(path).map(|_| ())
    }

    fn write_dataset(&mut self, path: &str, value: &DatasetValue) -> Result<()> {
        let (parent, name) = split_parent(path);
        if name.is_empty() {
            bail!("dataset path '{path}' has no name");
        }
        let group = self.vivify(parent)?;
        match value {
            DatasetValue::Float(v) => write_numeric(&group, name, v.as_slice()),
            DatasetValue::Int(v) => write_numeric(&group, name, v.as_slice()),
            DatasetValue::Bool(v) => write_numeric(&group, name, v.as_slice()),
            DatasetValue::Text { value, capacity } => write_text(&group, name, value, *capacity),
        }
        .with_context(|| format!("Failed to write dataset '{path}'"))
    }

    fn read_dataset(&self, path: &str) -> Result<DatasetValue> {
        let ds = self
            .file
            .dataset(path.trim_matches('/'))
            .with_context(|| format!("dataset '{path}' does not exist"))?;
        let value = match ds.dtype()?.to_descriptor()? {
            TypeDescriptor::Float(_) => DatasetValue::Float(ds.read_raw::<f64>()?),
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
                DatasetValue::Int(ds.read_raw::<i64>()?)
            }
            TypeDescriptor::Boolean => DatasetValue::Bool(ds.read_raw::<bool>()?),
            TypeDescriptor::FixedUnicode(capacity) => DatasetValue::Text {
                value: read_text(&ds, capacity)?,
                capacity,
            },
            other => bail!("unsupported dataset type {other:?} at '{path}'"),
        };
        Ok(value)
    }

    fn attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>> {
        let group = self.group(path)?;
        if !group.attr_names()?.iter().any(|n| n == name) {
            return Ok(None);
        }
        let attr = group.attr(name)?;
        let value = if attr.is_scalar() {
            AttrValue::Text(attr.read_scalar::<VarLenUnicode>()?.as_str().to_string())
        } else {
            AttrValue::List(
                attr.read_raw::<VarLenUnicode>()?
                    .into_iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            )
        };
        Ok(Some(value))
    }

    fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()> {
        let group = self.vivify(path)?;
        let _ = group.delete_attr(name);
        match value {
            AttrValue::Text(text) => {
                group
                    .new_attr::<VarLenUnicode>()
                    .create(name)?
                    .write_scalar(&unicode(text)?)?;
            }
            AttrValue::List(items) => {
                let items = items
                    .iter()
                    .map(|item| unicode(item))
                    .collect::<Result<Vec<_>>>()?;
                group
                    .new_attr_builder()
                    .with_data(items.as_slice())
                    .create(name)?;
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Backend for `"hdf5"` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hdf5Backend;

impl FileBackend for Hdf5Backend {
    fn name(&self) -> &'static str {
        "hdf5"
    }

    fn extension(&self) -> &'static str {
        "nxs"
    }

    fn create(&self, path: &Path) -> Result<()> {
        File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn HierarchicalFile>> {
        let file = File::append(path)
            .with_context(|| format!("Failed to open HDF5 file {}", path.display()))?;
        Ok(Box::new(Hdf5File { file }))
    }
}
