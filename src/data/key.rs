//! Tagged-key parsing.
//!
//! Keys in a [`ValueBatch`](super::value::ValueBatch) carry routing hints in
//! their text:
//!
//! ```text
//! environment/axes:temperature
//! ^^^^^^^^^^^ ^^^^ ^^^^^^^^^^^
//!  location   tag     name
//! ```
//!
//! The location picks the child group of the entry, the colon-separated tags
//! become NeXus plot-hint attributes on that group, and the name is the
//! dataset (or sub-group) that is written. The location may also follow the
//! tags (`axes:environment/temperature`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Child group of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Primary,
    Detectors,
    Environment,
    Metadata,
}

impl Location {
    /// Group name inside an entry.
    pub fn group_name(&self) -> &'static str {
        match self {
            Location::Primary => "nmr_data",
            Location::Detectors => "detectors",
            Location::Environment => "environment",
            Location::Metadata => "metadata",
        }
    }

    /// Every child group, in the order they are created.
    pub const ALL: [Location; 4] = [
        Location::Primary,
        Location::Detectors,
        Location::Environment,
        Location::Metadata,
    ];

    fn from_prefix(prefix: &str) -> Option<Location> {
        match prefix {
            "metadata" => Some(Location::Metadata),
            "environment" => Some(Location::Environment),
            "detectors" => Some(Location::Detectors),
            _ => None,
        }
    }
}

/// NeXus plotting role attached to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotTag {
    /// Single-valued `signal` attribute.
    Signal,
    /// Appended to the `axes` list attribute.
    Axes,
    /// Appended to the `auxiliary_signals` list attribute.
    AuxiliarySignals,
}

impl PlotTag {
    /// Attribute name on the parent group.
    pub fn attr_name(&self) -> &'static str {
        match self {
            PlotTag::Signal => "signal",
            PlotTag::Axes => "axes",
            PlotTag::AuxiliarySignals => "auxiliary_signals",
        }
    }

    /// List attributes accumulate, `signal` is overwritten.
    pub fn is_list(&self) -> bool {
        !matches!(self, PlotTag::Signal)
    }
}

impl FromStr for PlotTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(PlotTag::Signal),
            "axes" => Ok(PlotTag::Axes),
            "auxiliary_signals" => Ok(PlotTag::AuxiliarySignals),
            other => Err(format!("unknown plot tag '{other}'")),
        }
    }
}

/// Structured form of a raw batch key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedKey {
    /// Explicit location prefix, if one was given.
    pub location: Option<Location>,
    /// Recognised tags in the order they appeared. Unknown tags are dropped.
    pub tags: Vec<PlotTag>,
    /// Untagged name. May contain `/` to address a nested group.
    pub name: String,
}

impl TaggedKey {
    /// Parse a raw key. Never fails; anything unrecognised stays in the name.
    pub fn parse(raw: &str) -> TaggedKey {
        let (mut location, rest) = split_location(raw);
        let mut segments: Vec<&str> = rest.split(':').collect();
        let last = segments.pop().unwrap_or_default();

        let name = match (location, split_location(last)) {
            (None, (Some(inner), name)) => {
                location = Some(inner);
                name
            }
            _ => last,
        };

        let tags = segments
            .into_iter()
            .filter_map(|tag| tag.parse::<PlotTag>().ok())
            .collect();

        TaggedKey {
            location,
            tags,
            name: name.to_string(),
        }
    }

    pub fn has_tag(&self, tag: PlotTag) -> bool {
        self.tags.contains(&tag)
    }
}

impl fmt::Display for TaggedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = self.location {
            write!(f, "{}/", location.group_name())?;
        }
        for tag in &self.tags {
            write!(f, "{}:", tag.attr_name())?;
        }
        f.write_str(&self.name)
    }
}

/// Split off a known `location/` prefix. Unknown prefixes are left alone.
fn split_location(text: &str) -> (Option<Location>, &str) {
    if let Some((prefix, rest)) = text.split_once('/') {
        if !prefix.contains(':') {
            if let Some(location) = Location::from_prefix(prefix) {
                return (Some(location), rest);
            }
        }
    }
    (None, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_key_has_no_routing() {
        let key = TaggedKey::parse("tnmr_sequence");
        assert_eq!(key.location, None);
        assert!(key.tags.is_empty());
        assert_eq!(key.name, "tnmr_sequence");
    }

    #[test]
    fn tags_are_stripped_from_the_name() {
        let key = TaggedKey::parse("signal:tnmr_reals");
        assert_eq!(key.tags, vec![PlotTag::Signal]);
        assert_eq!(key.name, "tnmr_reals");

        let key = TaggedKey::parse("auxiliary_signals:tnmr_imags");
        assert_eq!(key.tags, vec![PlotTag::AuxiliarySignals]);
        assert_eq!(key.name, "tnmr_imags");
    }

    #[test]
    fn location_before_tags() {
        let key = TaggedKey::parse("environment/axes:temperature");
        assert_eq!(key.location, Some(Location::Environment));
        assert_eq!(key.tags, vec![PlotTag::Axes]);
        assert_eq!(key.name, "temperature");
    }

    #[test]
    fn location_after_tags() {
        let key = TaggedKey::parse("axes:environment/field");
        assert_eq!(key.location, Some(Location::Environment));
        assert_eq!(key.tags, vec![PlotTag::Axes]);
        assert_eq!(key.name, "field");
    }

    #[test]
    fn metadata_location() {
        let key = TaggedKey::parse("metadata/nucleus");
        assert_eq!(key.location, Some(Location::Metadata));
        assert_eq!(key.name, "nucleus");
    }

    #[test]
    fn unknown_prefix_stays_in_name() {
        let key = TaggedKey::parse("calibration/offset");
        assert_eq!(key.location, None);
        assert_eq!(key.name, "calibration/offset");
    }

    #[test]
    fn unknown_tags_are_dropped() {
        let key = TaggedKey::parse("units:signal:volts");
        assert_eq!(key.tags, vec![PlotTag::Signal]);
        assert_eq!(key.name, "volts");
    }

    #[test]
    fn display_normalises_key() {
        let key = TaggedKey::parse("axes:environment/field");
        assert_eq!(key.to_string(), "environment/axes:field");
    }
}
