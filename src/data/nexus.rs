//! NeXus-flavoured layout on top of a [`HierarchicalFile`].
//!
//! # File layout
//!
//! ```text
//! /                      @version = "100"
//! /metadata/             date, local_contact, proposal, users (written once)
//! /entry1/               @NX_class = NXentry, @default = nmr_data
//!     start_time         RFC 3339, fixed capacity 48
//!     end_time           advanced on every write touching the entry
//!     nmr_data/          @NX_class = NXdata, @signal, @axes, @auxiliary_signals
//!     detectors/         @NX_class = NXdata
//!     environment/       @NX_class = NXdata
//!     metadata/          @NX_class = NXcollection
//! /entry2/ ...
//! ```
//!
//! # Entry resolution
//!
//! Every value carries a timestamp. The timestamp is truncated to whole
//! seconds and rendered as `YYYY-MM-DDTHH:MM:SS` (UTC); the value goes into
//! the first entry, in ascending suffix order, whose `start_time` begins with
//! that key. If there is none, entry `max + 1` is created. Two timestamps in
//! the same second therefore share an entry, and entries are never removed.

use super::key::{Location, PlotTag, TaggedKey};
use super::store::{join, AttrValue, DatasetValue, HierarchicalFile};
use super::value::{NumericArray, Scalar, TimedValue, Value};
use crate::experiment::ExperimentContext;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Prefix of entry group names (`entry1`, `entry2`, ...).
pub const ENTRY_PREFIX: &str = "entry";
/// Schema revision stored in the root `version` attribute.
pub const SCHEMA_VERSION: &str = "100";
/// Capacity of the `start_time` / `end_time` text datasets.
pub const TIMESTAMP_CAPACITY: usize = 48;
/// Extra capacity given to text datasets beyond their initial length.
pub const TEXT_SLACK: usize = 16;
/// Capacity of the text datasets in the root `/metadata` group.
pub const METADATA_CAPACITY: usize = 128;

/// Entry lookup key for a Unix timestamp (second granularity, UTC).
pub fn entry_key(timestamp: f64) -> String {
    to_utc(timestamp)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Text stored in `start_time` for a new entry.
pub fn start_time_text(timestamp: f64) -> String {
    to_utc(timestamp).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_utc(timestamp: f64) -> DateTime<Utc> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).unwrap_or_default()
}

/// Entry groups of `file`, ordered by numeric suffix.
pub fn entries(file: &dyn HierarchicalFile) -> Result<Vec<String>> {
    let mut numbered: Vec<(u64, String)> = file
        .member_groups("")?
        .into_iter()
        .filter_map(|name| {
            let n = name.strip_prefix(ENTRY_PREFIX)?.parse::<u64>().ok()?;
            Some((n, name))
        })
        .collect();
    numbered.sort_unstable();
    Ok(numbered.into_iter().map(|(_, name)| name).collect())
}

/// Whether [`ensure_file_header`] wrote the `/metadata` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOutcome {
    Written,
    AlreadyPresent,
}

/// Write the root `version` attribute and the `/metadata` block if missing.
///
/// Existing values are left untouched, so calling this for every scan into
/// the same file is harmless.
pub fn ensure_file_header(
    file: &mut dyn HierarchicalFile,
    context: &ExperimentContext,
    now: DateTime<Utc>,
) -> Result<HeaderOutcome> {
    if file.attr("", "version")?.is_none() {
        file.set_attr("", "version", &AttrValue::Text(SCHEMA_VERSION.to_string()))?;
    }
    if file.exists("metadata/date") {
        return Ok(HeaderOutcome::AlreadyPresent);
    }

    let fields = [
        ("date", now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("local_contact", context.local_contact.clone()),
        ("proposal", context.proposal.clone()),
        ("users", context.users_text()),
    ];
    for (name, text) in fields {
        let capacity = METADATA_CAPACITY.max(text.len());
        file.write_dataset(
            &join("metadata", name),
            &DatasetValue::Text {
                value: text,
                capacity,
            },
        )?;
    }
    Ok(HeaderOutcome::Written)
}

/// Writes tagged values into the entries of one open file.
///
/// A writer lives for a single sink call. Entry lookups are cached for that
/// call only, since other processes never write the file concurrently but a
/// later call must see entries created in between.
pub struct NexusWriter<'a> {
    file: &'a mut dyn HierarchicalFile,
    context: &'a ExperimentContext,
    now: DateTime<Utc>,
    resolved: HashMap<String, String>,
}

impl<'a> NexusWriter<'a> {
    /// `now` is what `end_time` is advanced to.
    pub fn new(
        file: &'a mut dyn HierarchicalFile,
        context: &'a ExperimentContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            file,
            context,
            now,
            resolved: HashMap::new(),
        }
    }

    /// Find or create the entry for `timestamp`, returning its group name.
    pub fn resolve_entry(&mut self, timestamp: f64) -> Result<String> {
        let key = entry_key(timestamp);
        if let Some(entry) = self.resolved.get(&key) {
            return Ok(entry.clone());
        }

        let existing = entries(&*self.file)?;
        for entry in &existing {
            let start = join(entry, "start_time");
            if !self.file.exists(&start) {
                continue;
            }
            let matches = self
                .file
                .read_dataset(&start)?
                .as_text()
                .is_some_and(|text| text.starts_with(&key));
            if matches {
                self.resolved.insert(key, entry.clone());
                return Ok(entry.clone());
            }
        }

        let next = existing
            .iter()
            .filter_map(|name| name.strip_prefix(ENTRY_PREFIX)?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let entry = format!("{ENTRY_PREFIX}{next}");
        self.initialise_entry(&entry, timestamp)?;
        debug!(entry = %entry, key = %key, "Created entry");
        self.resolved.insert(key, entry.clone());
        Ok(entry)
    }

    fn initialise_entry(&mut self, entry: &str, timestamp: f64) -> Result<()> {
        self.file.require_group(entry)?;
        self.file
            .set_attr(entry, "NX_class", &AttrValue::Text("NXentry".into()))?;
        self.file.set_attr(
            entry,
            "default",
            &AttrValue::Text(Location::Primary.group_name().into()),
        )?;
        for location in Location::ALL {
            let group = join(entry, location.group_name());
            let class = match location {
                Location::Metadata => "NXcollection",
                _ => "NXdata",
            };
            self.file.require_group(&group)?;
            self.file
                .set_attr(&group, "NX_class", &AttrValue::Text(class.into()))?;
        }
        let start = start_time_text(timestamp);
        self.write_timestamp(entry, "start_time", start.clone())?;
        self.write_timestamp(entry, "end_time", start)
    }

    fn write_timestamp(&mut self, entry: &str, name: &str, text: String) -> Result<()> {
        self.file.write_dataset(
            &join(entry, name),
            &DatasetValue::Text {
                value: text,
                capacity: TIMESTAMP_CAPACITY,
            },
        )
    }

    /// Child group that receives an untagged key.
    ///
    /// An explicit location prefix wins; otherwise names registered as
    /// detectors or environment devices go to their groups and everything
    /// else is primary data.
    pub fn destination(&self, key: &TaggedKey) -> Location {
        match key.location {
            Some(location) => location,
            None if self.context.is_detector(&key.name) => Location::Detectors,
            None if self.context.is_environment(&key.name) => Location::Environment,
            None => Location::Primary,
        }
    }

    /// Write one tagged value. Returns the dataset (or group) path written.
    pub fn put(&mut self, raw_key: &str, timed: &TimedValue) -> Result<String> {
        let key = TaggedKey::parse(raw_key);
        if key.name.trim_matches('/').is_empty() {
            bail!("key '{raw_key}' has no name after removing tags");
        }

        let entry = self.resolve_entry(timed.timestamp)?;
        let end = self.now.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.write_timestamp(&entry, "end_time", end)?;

        let group = join(&entry, self.destination(&key).group_name());
        for tag in &key.tags {
            self.apply_tag(&group, *tag, &key.name)?;
        }

        let path = join(&group, &key.name);
        self.write_value(&path, &timed.value)
            .with_context(|| format!("Failed to write '{raw_key}' to {path}"))?;
        Ok(path)
    }

    fn apply_tag(&mut self, group: &str, tag: PlotTag, name: &str) -> Result<()> {
        let attr = tag.attr_name();
        let value = if tag.is_list() {
            let mut items = self
                .file
                .attr(group, attr)?
                .map(|existing| existing.items())
                .unwrap_or_default();
            if items.iter().any(|item| item == name) {
                return Ok(());
            }
            items.push(name.to_string());
            AttrValue::List(items)
        } else {
            AttrValue::Text(name.to_string())
        };
        self.file.set_attr(group, attr, &value)
    }

    /// Mappings become groups, everything else a dataset at `path`.
    fn write_value(&mut self, path: &str, value: &Value) -> Result<()> {
        let dataset = match value {
            Value::Mapping(map) => {
                self.file.require_group(path)?;
                for (name, child) in map {
                    self.write_value(&join(path, name), child)?;
                }
                return Ok(());
            }
            Value::Text(text) => DatasetValue::text(text.clone(), TEXT_SLACK),
            Value::Array(NumericArray::Float(v)) => DatasetValue::Float(v.clone()),
            Value::Array(NumericArray::Int(v)) => DatasetValue::Int(v.clone()),
            Value::Scalar(Scalar::Float(v)) => DatasetValue::Float(vec![*v]),
            Value::Scalar(Scalar::Int(v)) => DatasetValue::Int(vec![*v]),
            Value::Scalar(Scalar::Bool(v)) => DatasetValue::Bool(vec![*v]),
        };
        self.file.write_dataset(path, &dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::tree::TreeFile;
    use crate::experiment::ExperimentContextBuilder;
    use indexmap::IndexMap;
    use std::path::Path;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).unwrap()
    }

    fn open(dir: &Path) -> TreeFile {
        TreeFile::open(&dir.join("t.nxs.json")).unwrap()
    }

    #[test]
    fn entry_key_truncates_to_seconds() {
        assert_eq!(entry_key(1_000_000.000001), "1970-01-12T13:46:40");
        assert_eq!(entry_key(1_000_000.999), "1970-01-12T13:46:40");
        assert_eq!(start_time_text(1_000_000.5), "1970-01-12T13:46:40.500000Z");
        assert!(start_time_text(1_000_000.000001).starts_with(&entry_key(1_000_000.000001)));
    }

    #[test]
    fn new_entry_is_fully_initialised() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContext::default();
        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        assert_eq!(writer.resolve_entry(1_000_000.0).unwrap(), "entry1");

        assert_eq!(
            file.attr("entry1", "NX_class").unwrap(),
            Some(AttrValue::Text("NXentry".into()))
        );
        assert_eq!(
            file.attr("entry1", "default").unwrap(),
            Some(AttrValue::Text("nmr_data".into()))
        );
        for group in ["nmr_data", "detectors", "environment", "metadata"] {
            assert!(file.exists(&join("entry1", group)), "{group} missing");
        }
        assert_eq!(
            file.attr("entry1/metadata", "NX_class").unwrap(),
            Some(AttrValue::Text("NXcollection".into()))
        );
        assert_eq!(
            file.read_dataset("entry1/start_time").unwrap(),
            DatasetValue::Text {
                value: "1970-01-12T13:46:40.000000Z".into(),
                capacity: TIMESTAMP_CAPACITY
            }
        );
    }

    #[test]
    fn entries_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        for name in ["entry10", "entry2", "notes", "entry1", "entryX"] {
            file.require_group(name).unwrap();
        }
        assert_eq!(entries(&file).unwrap(), vec!["entry1", "entry2", "entry10"]);
    }

    #[test]
    fn gaps_in_suffixes_use_max_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        file.require_group("entry7").unwrap();
        let ctx = ExperimentContext::default();
        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        assert_eq!(writer.resolve_entry(5.0).unwrap(), "entry8");
    }

    #[test]
    fn list_tags_accumulate_and_signal_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContext::default();
        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        writer.put("axes:t", &TimedValue::new(1.0, vec![0.0, 1.0])).unwrap();
        writer.put("axes:f", &TimedValue::new(1.0, vec![0.0, 1.0])).unwrap();
        writer.put("signal:a", &TimedValue::new(1.0, vec![1.0])).unwrap();
        writer.put("signal:b", &TimedValue::new(1.0, vec![2.0])).unwrap();

        assert_eq!(
            file.attr("entry1/nmr_data", "axes").unwrap(),
            Some(AttrValue::List(vec!["t".into(), "f".into()]))
        );
        assert_eq!(
            file.attr("entry1/nmr_data", "signal").unwrap(),
            Some(AttrValue::Text("b".into()))
        );
    }

    #[test]
    fn nested_mappings_become_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContext::default();
        let mut inner = IndexMap::new();
        inner.insert("pulse_width".to_string(), Value::from(2.5));
        inner.insert("phase_cycle".to_string(), Value::from("0 2"));
        let mut outer = IndexMap::new();
        outer.insert("0".to_string(), Value::from(inner));

        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        let path = writer
            .put("tnmr_sequence", &TimedValue::new(1.0, Value::from(outer)))
            .unwrap();
        assert_eq!(path, "entry1/nmr_data/tnmr_sequence");
        assert_eq!(
            file.read_dataset("entry1/nmr_data/tnmr_sequence/0/pulse_width").unwrap(),
            DatasetValue::Float(vec![2.5])
        );
        assert_eq!(
            file.read_dataset("entry1/nmr_data/tnmr_sequence/0/phase_cycle").unwrap(),
            DatasetValue::text("0 2", TEXT_SLACK)
        );
    }

    #[test]
    fn registered_devices_route_to_their_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContextBuilder::new()
            .detector("pickup")
            .environment("field")
            .build();
        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        assert_eq!(
            writer.put("pickup", &TimedValue::new(1.0, 0.5)).unwrap(),
            "entry1/detectors/pickup"
        );
        assert_eq!(
            writer.put("field", &TimedValue::new(1.0, 9.4)).unwrap(),
            "entry1/environment/field"
        );
        assert_eq!(
            writer.put("metadata/field", &TimedValue::new(1.0, "9.4 T")).unwrap(),
            "entry1/metadata/field"
        );
    }

    #[test]
    fn tag_only_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContext::default();
        let mut writer = NexusWriter::new(&mut file, &ctx, now());
        assert!(writer.put("signal:", &TimedValue::new(1.0, 1.0)).is_err());
    }

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open(dir.path());
        let ctx = ExperimentContextBuilder::new()
            .proposal("p42")
            .local_contact("Dr. Who")
            .user("amy")
            .build();
        assert_eq!(
            ensure_file_header(&mut file, &ctx, now()).unwrap(),
            HeaderOutcome::Written
        );
        let other = ExperimentContextBuilder::new().proposal("p99").build();
        assert_eq!(
            ensure_file_header(&mut file, &other, now()).unwrap(),
            HeaderOutcome::AlreadyPresent
        );
        assert_eq!(
            file.read_dataset("metadata/proposal").unwrap().as_text(),
            Some("p42")
        );
        assert_eq!(
            file.attr("", "version").unwrap(),
            Some(AttrValue::Text(SCHEMA_VERSION.into()))
        );
        // the header group is not an entry
        assert!(entries(&file).unwrap().is_empty());
    }
}
