//! Mock Hardware Implementations
//!
//! Simulated devices for tests and the `simulate` command. Nothing here
//! sleeps: the spectrometer advances its state per status poll, so a scan
//! against it runs as fast as the driver's own pauses allow (instantly under
//! a paused tokio clock).
//!
//! # Available Mocks
//!
//! - `MockSpectrometer` - busy for a fixed number of status polls, then idle,
//!   with an acquisition counter that catches up one step per parameter read
//! - `MockSensor` - fixed scalar reading with scripted failures

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::hardware::capabilities::{
    Acquisition, DeviceStatus, NmrSpectrometer, Readable, SampleInfo,
};
use crate::sequence::{AcquisitionParams, Sequence};

/// Status code while acquiring.
pub const STATUS_ACQUIRING: u16 = 250;
/// Status code once idle.
pub const STATUS_IDLE: u16 = 100;

const FID_POINTS: usize = 64;
const FID_T2_US: f64 = 80.0;

// =============================================================================
// MockSpectrometer
// =============================================================================

#[derive(Debug, Default)]
struct SpectrometerState {
    sequence: Option<Sequence>,
    runs: u32,
    busy_left: u32,
    actual: u32,
    sequences_seen: Vec<Sequence>,
}

/// Mock NMR console.
///
/// # Example
///
/// ```rust,ignore
/// let nmr = MockSpectrometer::new().with_busy_polls(3).fail_read_on_run(2);
/// nmr.set_sequence(&seq).await?;
/// nmr.compile_and_run(true).await?;
/// assert_eq!(nmr.status().await?.code, STATUS_ACQUIRING);
/// ```
pub struct MockSpectrometer {
    state: Mutex<SpectrometerState>,
    params: AcquisitionParams,
    info: SampleInfo,
    busy_polls: u32,
    counter_lag: u32,
    stall_counter: bool,
    failing_runs: BTreeSet<u32>,
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpectrometer {
    /// Idle console with default timing, busy for two polls per run.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SpectrometerState::default()),
            params: AcquisitionParams::default(),
            info: SampleInfo {
                nucleus: "1H".to_string(),
                sample: "water".to_string(),
                comments: "mock spectrometer".to_string(),
            },
            busy_polls: 2,
            counter_lag: 1,
            stall_counter: false,
            failing_runs: BTreeSet::new(),
        }
    }

    pub fn with_params(mut self, params: AcquisitionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_sample_info(mut self, info: SampleInfo) -> Self {
        self.info = info;
        self
    }

    /// Number of status polls reporting [`STATUS_ACQUIRING`] after each run.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// How far the acquisition counter trails the target when the run ends.
    pub fn with_counter_lag(mut self, lag: u32) -> Self {
        self.counter_lag = lag;
        self
    }

    /// Never let the acquisition counter reach its target.
    pub fn with_stalled_counter(mut self) -> Self {
        self.stall_counter = true;
        self
    }

    /// Make `read` fail after the given run (1-based).
    pub fn fail_read_on_run(mut self, run: u32) -> Self {
        self.failing_runs.insert(run);
        self
    }

    /// Number of `compile_and_run` calls so far.
    pub async fn runs(&self) -> u32 {
        self.state.lock().await.runs
    }

    /// Every sequence that was run, in order.
    pub async fn sequences_run(&self) -> Vec<Sequence> {
        self.state.lock().await.sequences_seen.clone()
    }

    fn fid(&self, run: u32) -> Acquisition {
        let dwell = self.params.acquisition_time / FID_POINTS as f64;
        let offset_hz = 5_000.0 + 250.0 * f64::from(run);
        let t: Vec<f64> = (0..FID_POINTS).map(|i| i as f64 * dwell).collect();
        let envelope = |t_us: f64| (-t_us / FID_T2_US).exp();
        let phase = |t_us: f64| 2.0 * PI * offset_hz * t_us * 1e-6;
        Acquisition {
            reals: t.iter().map(|&x| envelope(x) * phase(x).cos()).collect(),
            imags: t.iter().map(|&x| envelope(x) * phase(x).sin()).collect(),
            t,
        }
    }
}

#[async_trait]
impl NmrSpectrometer for MockSpectrometer {
    async fn set_sequence(&self, sequence: &Sequence) -> Result<()> {
        self.state.lock().await.sequence = Some(sequence.clone());
        Ok(())
    }

    async fn compile_and_run(&self, _blocking: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let sequence = state
            .sequence
            .clone()
            .ok_or_else(|| anyhow!("No sequence loaded"))?;
        state.sequences_seen.push(sequence);
        state.runs += 1;
        state.busy_left = self.busy_polls;
        state.actual = if self.busy_polls == 0 {
            self.params.num_acquisitions.saturating_sub(self.counter_lag)
        } else {
            0
        };
        Ok(())
    }

    async fn status(&self) -> Result<DeviceStatus> {
        let mut state = self.state.lock().await;
        if state.busy_left > 0 {
            state.busy_left -= 1;
            if state.busy_left == 0 {
                state.actual = self.params.num_acquisitions.saturating_sub(self.counter_lag);
            }
            return Ok(DeviceStatus::new(STATUS_ACQUIRING, "Acquiring"));
        }
        Ok(DeviceStatus::new(STATUS_IDLE, "Idle"))
    }

    async fn read(&self) -> Result<Acquisition> {
        let run = self.state.lock().await.runs;
        if self.failing_runs.contains(&run) {
            return Err(anyhow!("Lost connection to spectrometer while reading run {run}"));
        }
        Ok(self.fid(run))
    }

    async fn parameters(&self) -> Result<AcquisitionParams> {
        let mut state = self.state.lock().await;
        let params = AcquisitionParams {
            num_acquisitions_actual: state.actual,
            ..self.params.clone()
        };
        if state.busy_left == 0 && !self.stall_counter && state.actual < self.params.num_acquisitions
        {
            state.actual += 1;
        }
        Ok(params)
    }

    async fn sample_info(&self) -> Result<SampleInfo> {
        Ok(self.info.clone())
    }
}

// =============================================================================
// MockSensor
// =============================================================================

/// Scalar sensor whose n-th reads can be scripted to fail.
///
/// # Example
///
/// ```rust,ignore
/// let sensor = MockSensor::new(4.2).failing_reads([2, 3]);
/// assert!(sensor.read().await.is_ok());   // read 1
/// assert!(sensor.read().await.is_err());  // read 2
/// ```
pub struct MockSensor {
    value: RwLock<f64>,
    reads: AtomicU32,
    failing: BTreeSet<u32>,
    always_fail: bool,
}

impl MockSensor {
    pub fn new(value: f64) -> Self {
        Self {
            value: RwLock::new(value),
            reads: AtomicU32::new(0),
            failing: BTreeSet::new(),
            always_fail: false,
        }
    }

    /// Fail the given read attempts (1-based, counting every call).
    pub fn failing_reads(mut self, reads: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(reads);
        self
    }

    /// Fail every read.
    pub fn broken(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub async fn set_value(&self, value: f64) {
        *self.value.write().await = value;
    }

    /// Number of read attempts so far, failed ones included.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readable for MockSensor {
    async fn read(&self) -> Result<f64> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail || self.failing.contains(&n) {
            return Err(anyhow!("Sensor read {n} timed out"));
        }
        Ok(*self.value.read().await)
    }
}
