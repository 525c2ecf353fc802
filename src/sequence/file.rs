//! TOML sequence files.
//!
//! ```toml
//! [[pulses]]
//! pulse_width = 5.0
//! pulse_height = 40.0
//! delay_time = 1.0
//! phase_cycle = "0 0 2 2"
//!
//! [sweep]
//! indices = [1]
//! field = "delay_time"
//! log = { start = 10.0, end = 1000.0, points = 8 }
//! ```
//!
//! Without a `[sweep]` table the file describes exactly one sequence.

use super::{log_durations, make_sweep, FieldValue, Pulse, PulseField, Sequence};
use crate::error::{AppResult, NmrError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceFile {
    pub pulses: Vec<Pulse>,
    #[serde(default)]
    pub sweep: Option<SweepSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSpec {
    pub indices: Vec<usize>,
    pub field: PulseField,
    #[serde(default)]
    pub values: Option<Vec<FieldValue>>,
    #[serde(default)]
    pub log: Option<LogRange>,
}

/// `points` values between `start` and `end`, equally spaced in log space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogRange {
    pub start: f64,
    pub end: f64,
    pub points: usize,
}

impl SweepSpec {
    fn values(&self) -> AppResult<Vec<FieldValue>> {
        match (&self.values, &self.log) {
            (Some(values), None) => Ok(values.clone()),
            (None, Some(range)) => Ok(log_durations(range.start, range.end, range.points)?
                .into_iter()
                .map(FieldValue::from)
                .collect()),
            (Some(_), Some(_)) => Err(NmrError::Configuration(
                "sweep takes either 'values' or 'log', not both".to_string(),
            )),
            (None, None) => Err(NmrError::Configuration(
                "sweep needs 'values' or a 'log' range".to_string(),
            )),
        }
    }
}

impl SequenceFile {
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> AppResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn base(&self) -> Sequence {
        Sequence::new(self.pulses.clone())
    }

    /// Every sequence described by the file, in scan order.
    pub fn sequences(&self) -> AppResult<Vec<Sequence>> {
        let base = self.base();
        match &self.sweep {
            None => Ok(vec![base]),
            Some(sweep) => make_sweep(
                &base,
                sweep.indices.clone(),
                sweep.field,
                &sweep.values()?,
            ),
        }
    }
}
