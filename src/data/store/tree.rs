//! JSON tree backend.
//!
//! The file holds one serialized [`GroupNode`]. Opening reads it into memory,
//! commit writes it to a sibling temporary file and renames it over the
//! original, so a crash mid-write never leaves a half-written file behind.

use super::{segments, split_parent, AttrValue, DatasetValue, FileBackend, HierarchicalFile};
use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Group with attributes and ordered members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attrs: IndexMap<String, AttrValue>,
    #[serde(default)]
    pub members: IndexMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetValue),
}

impl GroupNode {
    fn node(&self, path: &str) -> Option<&Node> {
        let mut parts = segments(path);
        let first = parts.next()?;
        let mut current = self.members.get(first)?;
        for part in parts {
            match current {
                Node::Group(group) => current = group.members.get(part)?,
                Node::Dataset(_) => return None,
            }
        }
        Some(current)
    }

    fn group(&self, path: &str) -> Result<&GroupNode> {
        if segments(path).next().is_none() {
            return Ok(self);
        }
        match self.node(path) {
            Some(Node::Group(group)) => Ok(group),
            Some(Node::Dataset(_)) => bail!("'{path}' is a dataset, not a group"),
            None => bail!("group '{path}' does not exist"),
        }
    }

    /// Walk to `path`, creating missing groups on the way.
    fn vivify(&mut self, path: &str) -> Result<&mut GroupNode> {
        let mut current = self;
        for part in segments(path) {
            let node = current
                .members
                .entry(part.to_string())
                .or_insert_with(|| Node::Group(GroupNode::default()));
            current = match node {
                Node::Group(group) => group,
                Node::Dataset(_) => bail!("'{part}' in '{path}' is a dataset, not a group"),
            };
        }
        Ok(current)
    }
}

/// An open JSON tree file.
#[derive(Debug)]
pub struct TreeFile {
    path: PathBuf,
    root: GroupNode,
}

impl TreeFile {
    /// Open `path`; a missing or empty file is an empty tree.
    pub fn open(path: &Path) -> Result<Self> {
        let root = match fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => GroupNode::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GroupNode::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    /// Root group, for inspection.
    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(&self.root)?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl HierarchicalFile for TreeFile {
    fn member_groups(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .root
            .group(path)?
            .members
            .iter()
            .filter(|(_, node)| matches!(node, Node::Group(_)))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn exists(&self, path: &str) -> bool {
        segments(path).next().is_none() || self.root.node(path).is_some()
    }

    fn require_group(&mut self, path: &str) -> Result<()> {
        self.root.vivify(path).map(|_| ())
    }

    fn write_dataset(&mut self, path: &str, value: &DatasetValue) -> Result<()> {
        let (parent, name) = split_parent(path);
        if name.is_empty() {
            bail!("dataset path '{path}' has no name");
        }
        let group = self.root.vivify(parent)?;

        let value = match (group.members.get(name), value) {
            (Some(Node::Group(_)), _) => bail!("'{path}' is a group, not a dataset"),
            (
                Some(Node::Dataset(DatasetValue::Text { capacity: old, .. })),
                DatasetValue::Text { value: text, capacity },
            ) if *old >= text.len() => DatasetValue::Text {
                value: text.clone(),
                capacity: (*old).max(*capacity),
            },
            _ => value.clone(),
        };
        // IndexMap::insert keeps the original position of an existing key
        group.members.insert(name.to_string(), Node::Dataset(value));
        Ok(())
    }

    fn read_dataset(&self, path: &str) -> Result<DatasetValue> {
        match self.root.node(path) {
            Some(Node::Dataset(value)) => Ok(value.clone()),
            Some(Node::Group(_)) => Err(anyhow!("'{path}' is a group, not a dataset")),
            None => Err(anyhow!("dataset '{path}' does not exist")),
        }
    }

    fn attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>> {
        Ok(self.root.group(path)?.attrs.get(name).cloned())
    }

    fn set_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()> {
        let group = match self.root.node(path) {
            Some(Node::Dataset(_)) => bail!("attributes are only supported on groups ('{path}')"),
            _ => self.root.vivify(path)?,
        };
        group.attrs.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.save()
    }
}

/// Backend for `"nxjson"` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeBackend;

impl FileBackend for TreeBackend {
    fn name(&self) -> &'static str {
        "nxjson"
    }

    fn extension(&self) -> &'static str {
        "nxs.json"
    }

    fn create(&self, path: &Path) -> Result<()> {
        fs::File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn HierarchicalFile>> {
        Ok(Box::new(TreeFile::open(path)?))
    }
}
