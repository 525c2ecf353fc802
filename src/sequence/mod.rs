//! Pulse-sequence model.
//!
//! A [`Pulse`] is a fixed-shape record (width, height, delay, phase cycle) and
//! a [`Sequence`] is the ordered list of pulses sent to the spectrometer for a
//! single measurement point. Both are plain values: helpers in [`sweep`]
//! produce modified copies and never touch the originals.
//!
//! Units follow the spectrometer front panel: widths and delays in
//! microseconds, heights in amplifier units, phase cycles as space-separated
//! integers (`"0 1 2 3"`).

pub mod file;
pub mod sweep;
pub mod timing;

pub use file::SequenceFile;
pub use sweep::{log_durations, make_sweep, IndexSelection};
pub use timing::{
    estimate_duration, estimate_scan_duration, format_duration, format_duration_at,
    human_duration, log_sequence, render_sequence, AcquisitionParams,
};

use crate::data::value::Value;
use crate::error::{AppResult, NmrError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One RF pulse followed by its delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    #[serde(rename = "pulse_width")]
    width: f64,
    #[serde(rename = "pulse_height")]
    height: f64,
    #[serde(rename = "delay_time", alias = "relaxation_time")]
    delay: f64,
    phase_cycle: String,
}

/// Build a pulse. No validation beyond what the types already enforce.
pub fn make_pulse(width: f64, height: f64, delay: f64, phase_cycle: impl Into<String>) -> Pulse {
    Pulse {
        width,
        height,
        delay,
        phase_cycle: phase_cycle.into(),
    }
}

impl Pulse {
    /// Pulse width in microseconds.
    pub fn width(&self) -> f64 {
        self.width
    }

    /// Pulse amplitude.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Delay after the pulse in microseconds.
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Space-separated phase cycle.
    pub fn phase_cycle(&self) -> &str {
        &self.phase_cycle
    }

    /// Read a field by name.
    pub fn get(&self, field: PulseField) -> FieldValue {
        match field {
            PulseField::Width => FieldValue::Number(self.width),
            PulseField::Height => FieldValue::Number(self.height),
            PulseField::Delay => FieldValue::Number(self.delay),
            PulseField::PhaseCycle => FieldValue::Text(self.phase_cycle.clone()),
        }
    }

    /// Return a copy of this pulse with one field replaced.
    ///
    /// Numeric fields only accept [`FieldValue::Number`] and the phase cycle
    /// only accepts [`FieldValue::Text`].
    pub fn with_field(&self, field: PulseField, value: &FieldValue) -> AppResult<Pulse> {
        let mut pulse = self.clone();
        match (field, value) {
            (PulseField::Width, FieldValue::Number(v)) => pulse.width = *v,
            (PulseField::Height, FieldValue::Number(v)) => pulse.height = *v,
            (PulseField::Delay, FieldValue::Number(v)) => pulse.delay = *v,
            (PulseField::PhaseCycle, FieldValue::Text(v)) => pulse.phase_cycle = v.clone(),
            (PulseField::PhaseCycle, FieldValue::Number(_)) => {
                return Err(NmrError::SweepValueType {
                    field: field.as_str(),
                    expected: "text",
                })
            }
            (_, FieldValue::Text(_)) => {
                return Err(NmrError::SweepValueType {
                    field: field.as_str(),
                    expected: "numeric",
                })
            }
        }
        Ok(pulse)
    }

    /// Field mapping as written to the data file.
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert(PulseField::Width.as_str().to_string(), Value::from(self.width));
        map.insert(PulseField::Height.as_str().to_string(), Value::from(self.height));
        map.insert(PulseField::Delay.as_str().to_string(), Value::from(self.delay));
        map.insert(
            PulseField::PhaseCycle.as_str().to_string(),
            Value::from(self.phase_cycle.as_str()),
        );
        Value::Mapping(map)
    }
}

/// The four fields of a [`Pulse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseField {
    #[serde(rename = "pulse_width")]
    Width,
    #[serde(rename = "pulse_height")]
    Height,
    #[serde(rename = "delay_time", alias = "relaxation_time")]
    Delay,
    PhaseCycle,
}

impl PulseField {
    /// Name used in sequence files and in the written `tnmr_sequence` group.
    pub fn as_str(&self) -> &'static str {
        match self {
            PulseField::Width => "pulse_width",
            PulseField::Height => "pulse_height",
            PulseField::Delay => "delay_time",
            PulseField::PhaseCycle => "phase_cycle",
        }
    }
}

impl fmt::Display for PulseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PulseField {
    type Err = NmrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pulse_width" => Ok(PulseField::Width),
            "pulse_height" => Ok(PulseField::Height),
            "delay_time" | "relaxation_time" => Ok(PulseField::Delay),
            "phase_cycle" => Ok(PulseField::PhaseCycle),
            other => Err(NmrError::UnknownPulseField(other.to_string())),
        }
    }
}

/// A value that can be assigned to a pulse field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Ordered list of pulses. Equality is structural.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(Vec<Pulse>);

impl Sequence {
    pub fn new(pulses: Vec<Pulse>) -> Self {
        Self(pulses)
    }

    pub fn pulses(&self) -> &[Pulse] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pulse> {
        self.0.iter()
    }

    /// Copy of this sequence with `pulse` appended.
    pub fn with_pulse(&self, pulse: Pulse) -> Sequence {
        let mut pulses = self.0.clone();
        pulses.push(pulse);
        Sequence(pulses)
    }

    /// `{"0": {pulse fields}, "1": {...}, ...}` in pulse order.
    pub fn to_value(&self) -> Value {
        let map = self
            .0
            .iter()
            .enumerate()
            .map(|(i, pulse)| (i.to_string(), pulse.to_value()))
            .collect();
        Value::Mapping(map)
    }
}

impl FromIterator<Pulse> for Sequence {
    fn from_iter<T: IntoIterator<Item = Pulse>>(iter: T) -> Self {
        Sequence(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Pulse;
    type IntoIter = std::slice::Iter<'a, Pulse>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_relaxation_time_is_accepted() {
        let pulse: Pulse = serde_json::from_str(
            r#"{"pulse_width": 5.0, "pulse_height": 40.0, "relaxation_time": 12.5, "phase_cycle": "0 0 2 2"}"#,
        )
        .unwrap();
        assert_eq!(pulse.delay(), 12.5);
        assert_eq!("relaxation_time".parse::<PulseField>().unwrap(), PulseField::Delay);
    }

    #[test]
    fn with_field_rejects_mismatched_kinds() {
        let pulse = make_pulse(2.5, 40.0, 50.0, "0 0 0 0");
        assert!(matches!(
            pulse.with_field(PulseField::Width, &"fast".into()),
            Err(NmrError::SweepValueType { expected: "numeric", .. })
        ));
        assert!(matches!(
            pulse.with_field(PulseField::PhaseCycle, &1.0.into()),
            Err(NmrError::SweepValueType { expected: "text", .. })
        ));

        let changed = pulse.with_field(PulseField::PhaseCycle, &"0 1 2 3".into()).unwrap();
        assert_eq!(changed.phase_cycle(), "0 1 2 3");
        assert_eq!(pulse.phase_cycle(), "0 0 0 0");
    }

    #[test]
    fn sequence_value_is_keyed_by_position() {
        let seq = Sequence::new(vec![
            make_pulse(5.0, 40.0, 1.0, "0 0 2 2"),
            make_pulse(2.5, 40.0, 50.0, "0 0 0 0"),
        ]);
        let Value::Mapping(map) = seq.to_value() else {
            panic!("expected mapping");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["0", "1"]);
        let Some(Value::Mapping(second)) = map.get("1") else {
            panic!("expected nested mapping");
        };
        assert_eq!(second.get("delay_time"), Some(&Value::from(50.0)));
    }

    #[test]
    fn unknown_field_name_is_an_error() {
        assert!(matches!(
            "pulse_colour".parse::<PulseField>(),
            Err(NmrError::UnknownPulseField(_))
        ));
    }
}
