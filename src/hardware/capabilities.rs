//! Hardware Capabilities
//!
//! Small capability traits the scan driver and the sink talk to:
//!
//! - [`NmrSpectrometer`]: the TNMR-controlled console (sequence upload,
//!   compile-and-run, status polling, data readout, timing parameters)
//! - [`Readable`]: anything that yields one scalar on demand (temperature
//!   controller, field probe, pickup coil)
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations keep state behind interior mutability

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sequence::{AcquisitionParams, Sequence};

/// Status reported by the spectrometer.
///
/// Codes at or below 200 mean idle or finished; the 2xx range above 200
/// means an acquisition is in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub code: u16,
    pub message: String,
}

impl DeviceStatus {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the code is at or below `threshold`.
    pub fn is_finished(&self, threshold: u16) -> bool {
        self.code <= threshold
    }
}

/// One averaged acquisition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    pub reals: Vec<f64>,
    pub imags: Vec<f64>,
    /// Time axis in microseconds.
    pub t: Vec<f64>,
}

/// Static description of what is in the probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub nucleus: String,
    pub sample: String,
    pub comments: String,
}

/// Capability: NMR acquisition
///
/// # Contract
/// - `set_sequence` replaces the pulse program; it takes effect on the next
///   `compile_and_run`
/// - `compile_and_run(false)` returns once the run has been started;
///   `compile_and_run(true)` also waits for the compile step
/// - `status` is cheap and safe to poll
/// - `parameters` reflects the live counters (`num_acquisitions_actual`)
#[async_trait]
pub trait NmrSpectrometer: Send + Sync {
    /// Upload the pulse sequence for the next run.
    async fn set_sequence(&self, sequence: &Sequence) -> Result<()>;

    /// Compile the pulse program and start acquiring.
    async fn compile_and_run(&self, blocking: bool) -> Result<()>;

    /// Current status code.
    async fn status(&self) -> Result<DeviceStatus>;

    /// Averaged signal of the last run.
    async fn read(&self) -> Result<Acquisition>;

    /// Timing parameters and acquisition counters.
    async fn parameters(&self) -> Result<AcquisitionParams>;

    /// Nucleus, sample and free-text comments.
    async fn sample_info(&self) -> Result<SampleInfo>;
}

/// Capability: Scalar Readout
///
/// Devices that return a single scalar measurement.
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    ///
    /// Units depend on device type (kelvin, tesla, volts, ...).
    ///
    /// # Returns
    /// - Ok(value) on successful read
    /// - Err on hardware error or timeout
    async fn read(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_threshold_is_inclusive() {
        assert!(DeviceStatus::new(200, "idle").is_finished(200));
        assert!(DeviceStatus::new(100, "done").is_finished(200));
        assert!(!DeviceStatus::new(250, "acquiring").is_finished(200));
    }
}
