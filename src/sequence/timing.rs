//! Duration estimates and human-readable timing.

use super::Sequence;
use crate::data::value::Value;
use chrono::{DateTime, Local, TimeDelta};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Spectrometer timing parameters that the estimates depend on.
///
/// This is a snapshot record, not a live device handle, so estimates can be
/// computed away from the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParams {
    /// Acquisition window in microseconds.
    pub acquisition_time: f64,
    /// Dead time before acquisition in microseconds.
    pub pre_acquisition_time: f64,
    /// Recovery time after acquisition in milliseconds.
    pub post_acquisition_time: f64,
    /// Receiver ringdown in microseconds.
    pub ringdown_time: f64,
    /// Observe frequency in MHz.
    pub obs_freq: f64,
    /// Receiver phase cycle.
    pub acq_phase_cycle: String,
    /// Number of averaged scans requested.
    pub num_acquisitions: u32,
    /// Number of scans the instrument has completed so far.
    pub num_acquisitions_actual: u32,
    /// Suggested status polling interval in seconds.
    pub poll_interval: f64,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            acquisition_time: 204.8,
            pre_acquisition_time: 5.0,
            post_acquisition_time: 10.0,
            ringdown_time: 1.0,
            obs_freq: 100.0,
            acq_phase_cycle: "0 1 2 3".to_string(),
            num_acquisitions: 4,
            num_acquisitions_actual: 0,
            poll_interval: 1.0,
        }
    }
}

impl AcquisitionParams {
    /// Parameter mapping as written to the data file (`tnmr_params`).
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("acquisition_time".to_string(), Value::from(self.acquisition_time));
        map.insert("ringdown_time".to_string(), Value::from(self.ringdown_time));
        map.insert(
            "pre_acquisition_time".to_string(),
            Value::from(self.pre_acquisition_time),
        );
        map.insert(
            "post_acquisition_time".to_string(),
            Value::from(self.post_acquisition_time),
        );
        map.insert(
            "acq_phase_cycle".to_string(),
            Value::from(self.acq_phase_cycle.as_str()),
        );
        map.insert("obs_freq".to_string(), Value::from(self.obs_freq));
        map.insert("num_scans".to_string(), Value::from(self.num_acquisitions));
        Value::Mapping(map)
    }
}

/// Estimated wall time of one sequence, in seconds.
pub fn estimate_duration(params: &AcquisitionParams, sequence: &Sequence) -> f64 {
    let per_scan = params.acquisition_time * 1e-6
        + params.pre_acquisition_time * 1e-6
        + params.post_acquisition_time * 1e-3
        + sequence
            .iter()
            .map(|pulse| pulse.delay() * 1e-6 + pulse.width() * 1e-6)
            .sum::<f64>();
    per_scan * f64::from(params.num_acquisitions)
}

/// Sum of [`estimate_duration`] over several sequences.
pub fn estimate_scan_duration(params: &AcquisitionParams, sequences: &[Sequence]) -> f64 {
    sequences
        .iter()
        .map(|seq| estimate_duration(params, seq))
        .sum()
}

/// Duration text without the ETA suffix, bucketed by magnitude.
///
/// Anything at or below one nanosecond (including negative and NaN input)
/// renders as `"0s"`.
pub fn human_duration(seconds: f64) -> String {
    if seconds.is_infinite() && seconds > 0.0 {
        return "inf".to_string();
    }
    if seconds > 3600.0 {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{hours:.0}h{minutes:.0}m")
    } else if seconds > 60.0 {
        let minutes = (seconds / 60.0).floor();
        let rest = (seconds % 60.0).floor();
        format!("{minutes:.0}m{rest:.0}s")
    } else if seconds > 1.0 {
        format!("{seconds:.1}s")
    } else if seconds > 1e-3 {
        format!("{:.1}ms", seconds * 1e3)
    } else if seconds > 1e-6 {
        format!("{:.1}us", seconds * 1e6)
    } else if seconds > 1e-9 {
        format!("{:.1}ns", seconds * 1e9)
    } else {
        "0s".to_string()
    }
}

/// Duration text followed by the wall-clock time it ends at.
pub fn format_duration(seconds: f64) -> String {
    format_duration_at(seconds, Local::now())
}

/// [`format_duration`] against an explicit "now".
pub fn format_duration_at(seconds: f64, now: DateTime<Local>) -> String {
    let text = human_duration(seconds);
    let offset = if seconds.is_finite() && seconds > 0.0 {
        TimeDelta::try_milliseconds((seconds * 1e3) as i64)
    } else {
        Some(TimeDelta::zero())
    };
    match offset.and_then(|delta| now.checked_add_signed(delta)) {
        Some(end) => format!("{text} ({})", end.format("%Y-%m-%d %H:%M:%S")),
        None => text,
    }
}

/// Pulse table with the estimated duration underneath.
pub fn render_sequence(sequence: &Sequence, params: &AcquisitionParams) -> String {
    let rule = "------------------------";
    let mut lines = vec![rule.to_string(), "PW   |PH   |DT   |PC".to_string()];
    for pulse in sequence {
        lines.push(format!(
            "{:<5}|{:<5}|{:<5}|{}",
            pulse.width(),
            pulse.height(),
            pulse.delay(),
            pulse.phase_cycle()
        ));
    }
    lines.push(rule.to_string());
    lines.push(format!(
        "ETA: {}",
        format_duration(estimate_duration(params, sequence))
    ));
    lines.push(rule.to_string());
    lines.join("\n")
}

/// Emit [`render_sequence`] line by line at info level.
pub fn log_sequence(sequence: &Sequence, params: &AcquisitionParams) {
    for line in render_sequence(sequence, params).lines() {
        info!("{line}");
    }
}
