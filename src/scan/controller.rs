//! Scan controller.
//!
//! Owns the one scan session that may be open at a time and drives the
//! spectrometer through each point:
//!
//! ```text
//! set_sequence ─> settle ─> compile_and_run ─> wait (fraction of estimate)
//!     ─> poll status until finished ─> wait for acquisition counter
//!     ─> read signal + metadata + optional fields ─> sink.put_values
//! ```
//!
//! Every pause goes through [`ScanController::abort`]-aware sleeps, so an
//! operator can stop a scan between polls.

use super::clock::Clock;
use super::readers::FieldReader;
use super::state::{ScanPhase, ScanReport, ScanSession};
use crate::config::ScanConfig;
use crate::data::sink::{ScanSink, SinkFactory};
use crate::data::value::{TimedValue, Value, ValueBatch};
use crate::error::NmrError;
use crate::hardware::NmrSpectrometer;
use crate::sequence::{
    estimate_duration, estimate_scan_duration, format_duration, human_duration, Sequence,
};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Status codes at or above this are reported as instrument errors.
const STATUS_ERROR: u16 = 300;

type SharedSink = Arc<Mutex<Box<dyn ScanSink>>>;

struct OpenScan {
    id: Uuid,
    sink: SharedSink,
    files: Vec<PathBuf>,
    points: usize,
    active_runs: usize,
}

struct ControllerState {
    phase: ScanPhase,
    open: Option<OpenScan>,
}

impl ControllerState {
    fn current(&mut self, session: &ScanSession) -> Result<&mut OpenScan> {
        match &mut self.open {
            Some(open) if open.id == session.id() => Ok(open),
            Some(_) => Err(NmrError::StaleSession(session.id()).into()),
            None => Err(NmrError::NoOpenSession.into()),
        }
    }
}

/// Close the open session if it is still `id`. Returns whether it closed.
async fn close_if_current(state: &Mutex<ControllerState>, id: Uuid) -> bool {
    let mut state = state.lock().await;
    if state.open.as_ref().is_some_and(|open| open.id == id) {
        ScanController::close_locked(&mut state).await;
        true
    } else {
        false
    }
}

/// Closes the session of a scan whose future is dropped before it returns.
///
/// `run_scan` disarms the guard once it has closed or released the session
/// itself.
struct RunGuard {
    state: Arc<Mutex<ControllerState>>,
    session: Uuid,
    armed: bool,
}

impl RunGuard {
    fn new(state: Arc<Mutex<ControllerState>>, session: Uuid) -> Self {
        Self {
            state,
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(session = %self.session, "Scan cancelled without a runtime; session left open");
            return;
        };
        warn!(session = %self.session, "Scan cancelled; closing its session");
        let state = Arc::clone(&self.state);
        let id = self.session;
        runtime.spawn(async move {
            close_if_current(&state, id).await;
        });
    }
}

/// Drives scans and owns the scan session.
pub struct ScanController {
    factory: Arc<dyn SinkFactory>,
    settings: ScanConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<ControllerState>>,
    abort_requested: AtomicBool,
    abort_notify: Notify,
}

impl ScanController {
    pub fn new(factory: Arc<dyn SinkFactory>, settings: ScanConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory,
            settings,
            clock,
            state: Arc::new(Mutex::new(ControllerState {
                phase: ScanPhase::Idle,
                open: None,
            })),
            abort_requested: AtomicBool::new(false),
            abort_notify: Notify::new(),
        }
    }

    pub async fn phase(&self) -> ScanPhase {
        self.state.lock().await.phase
    }

    /// Id of the open session, if any.
    pub async fn open_session(&self) -> Option<Uuid> {
        self.state.lock().await.open.as_ref().map(|open| open.id)
    }

    /// Points written in the open session.
    pub async fn points_written(&self) -> usize {
        self.state
            .lock()
            .await
            .open
            .as_ref()
            .map_or(0, |open| open.points)
    }

    /// Open a session, or join the one already open.
    ///
    /// With `soft == false` any open session is closed first, so the caller
    /// always becomes the opener of a fresh session.
    pub async fn begin(&self, soft: bool) -> Result<ScanSession> {
        let mut state = self.state.lock().await;
        if !soft && state.open.is_some() {
            warn!("Closing the open scan session before starting a new one");
            Self::close_locked(&mut state).await;
        }
        if let Some(open) = &state.open {
            debug!(session = %open.id, "Joining open scan session");
            return Ok(ScanSession::new(open.id, false));
        }

        state.phase = ScanPhase::Opening;
        let opened = async {
            let mut sink = self.factory.create_sink().await?;
            sink.prepare().await?;
            sink.begin().await?;
            Ok::<_, anyhow::Error>(sink)
        }
        .await;
        let sink = match opened {
            Ok(sink) => sink,
            Err(e) => {
                state.phase = ScanPhase::Idle;
                return Err(e.context("Could not open scan session"));
            }
        };

        let id = Uuid::new_v4();
        info!(session = %id, "Opened scan session writing to {}", sink.short_name());
        state.open = Some(OpenScan {
            id,
            files: sink.paths().to_vec(),
            sink: Arc::new(Mutex::new(sink)),
            points: 0,
            active_runs: 0,
        });
        state.phase = ScanPhase::Running;
        Ok(ScanSession::new(id, true))
    }

    /// Close the session if `session` opened it. Returns whether it closed.
    pub async fn finish(&self, session: &ScanSession) -> Result<bool> {
        if !session.is_opener() {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let owns_open = state.open.as_ref().is_some_and(|open| open.id == session.id());
        if owns_open {
            Self::close_locked(&mut state).await;
        }
        Ok(owns_open)
    }

    /// Close whatever session is open.
    ///
    /// Without `force` a session with a scan still running is left alone.
    pub async fn end(&self, force: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(open) = state.open.as_ref().filter(|open| open.active_runs > 0 && !force) {
            warn!(session = %open.id, "A scan is still running; use force to close the session");
            return Ok(false);
        }
        let was_open = state.open.is_some();
        Self::close_locked(&mut state).await;
        Ok(was_open)
    }

    async fn close_locked(state: &mut ControllerState) {
        let Some(open) = state.open.take() else {
            return;
        };
        state.phase = ScanPhase::Closing;
        if let Err(e) = open.sink.lock().await.end().await {
            warn!(session = %open.id, error = %e, "Error while closing the sink");
        }
        info!(session = %open.id, points = open.points, "Closed scan session");
        state.phase = ScanPhase::Idle;
    }

    /// Interrupt the running scan at its next pause.
    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        self.abort_notify.notify_waiters();
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        if self.abort_requested.load(Ordering::SeqCst) {
            return Err(NmrError::Aborted.into());
        }
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = self.abort_notify.notified() => Err(NmrError::Aborted.into()),
        }
    }

    async fn adjust_runs(&self, session: &ScanSession, delta: isize) {
        let mut state = self.state.lock().await;
        if let Some(open) = state.open.as_mut().filter(|open| open.id == session.id()) {
            open.active_runs = open.active_runs.saturating_add_signed(delta);
        }
    }

    /// Acquire one point and hand it to the sink.
    pub async fn run_point(
        &self,
        session: &ScanSession,
        device: &dyn NmrSpectrometer,
        sequence: &Sequence,
        readers: &[Box<dyn FieldReader>],
    ) -> Result<()> {
        self.state.lock().await.current(session)?;

        device
            .set_sequence(sequence)
            .await
            .context("Failed to upload sequence")?;
        self.pause(self.settings.settle_delay).await?;
        device
            .compile_and_run(true)
            .await
            .context("Failed to start acquisition")?;

        let params = device.parameters().await?;
        let estimate = estimate_duration(&params, sequence);
        self.pause(seconds(estimate * self.settings.run_wait_fraction))
            .await?;

        let poll = seconds(params.poll_interval);
        loop {
            let status = device.status().await.context("Failed to query status")?;
            if status.code >= STATUS_ERROR {
                return Err(NmrError::Instrument(format!(
                    "status {}: {}",
                    status.code, status.message
                ))
                .into());
            }
            if status.is_finished(self.settings.finished_status) {
                break;
            }
            debug!(code = status.code, "Acquisition in progress");
            self.pause(poll).await?;
        }

        self.wait_for_acquisitions(device).await?;

        let acquisition = device.read().await.context("Failed to read signal")?;
        let info = device.sample_info().await?;
        let params = device.parameters().await?;
        let timestamp = self.clock.now();

        let mut batch = ValueBatch::new();
        let mut put = |key: &str, value: Value| {
            batch.insert(key.to_string(), TimedValue::new(timestamp, value));
        };
        put("signal:tnmr_reals", acquisition.reals.into());
        put("auxiliary_signals:tnmr_imags", acquisition.imags.into());
        put("axes:tnmr_times", acquisition.t.into());
        put("tnmr_sequence", sequence.to_value());
        put("tnmr_params", params.to_value());
        put("metadata/nucleus", info.nucleus.into());
        put("metadata/sample", info.sample.into());
        put("metadata/comments", info.comments.into());

        for reader in readers {
            match reader.read().await {
                Ok(value) => put(reader.key(), value),
                Err(reason) => {
                    warn!(field = reader.key(), %reason, "Could not read {}; leaving it out", reader.key())
                }
            }
        }

        if self.abort_requested.load(Ordering::SeqCst) {
            return Err(NmrError::Aborted.into());
        }
        // the session may have been ended while the instrument was busy
        let mut state = self.state.lock().await;
        let open = state.current(session).inspect_err(|_| {
            warn!(session = %session.id(), "Session closed during acquisition; discarding the point");
        })?;
        open.sink.lock().await.put_values(batch).await?;
        open.points += 1;
        Ok(())
    }

    /// Wait (bounded) until the instrument reports all averages done.
    async fn wait_for_acquisitions(&self, device: &dyn NmrSpectrometer) -> Result<()> {
        let deadline = Instant::now() + self.settings.flush_timeout;
        loop {
            let params = device.parameters().await?;
            if params.num_acquisitions_actual >= params.num_acquisitions {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    actual = params.num_acquisitions_actual,
                    target = params.num_acquisitions,
                    "Timed out waiting for acquisitions to finish"
                );
                return Ok(());
            }
            self.pause(self.settings.flush_interval).await?;
        }
    }

    /// Run every sequence as one point, in order.
    ///
    /// Never fails: any error stops the remaining points, is logged and
    /// closes the session. Points already written stay in the files. If the
    /// returned future is dropped before completion, the session is closed
    /// from a spawned task.
    pub async fn run_scan(
        &self,
        device: &dyn NmrSpectrometer,
        sequences: &[Sequence],
        readers: &[Box<dyn FieldReader>],
    ) -> ScanReport {
        let started = Instant::now();
        let total = sequences.len();
        let mut report = ScanReport {
            completed: 0,
            total,
            aborted: None,
            elapsed: Duration::ZERO,
            files: Vec::new(),
        };

        let session = match self.begin(true).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = ?e, "Scan not started");
                report.aborted = Some(format!("{e:#}"));
                report.elapsed = started.elapsed();
                return report;
            }
        };
        let guard = RunGuard::new(Arc::clone(&self.state), session.id());
        if session.is_opener() {
            self.abort_requested.store(false, Ordering::SeqCst);
        }
        report.files = self.files_of(&session).await;

        self.adjust_runs(&session, 1).await;
        let outcome = self
            .run_points(&session, device, sequences, readers, &mut report.completed)
            .await;
        self.adjust_runs(&session, -1).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = self.finish(&session).await {
                    warn!(error = %e, "Could not close scan session");
                }
            }
            Err(e) => {
                error!(
                    error = ?e,
                    "Scan stopped after {}/{} points", report.completed, total
                );
                report.aborted = Some(format!("{e:#}"));
                close_if_current(&self.state, session.id()).await;
            }
        }
        guard.disarm();

        report.elapsed = started.elapsed();
        info!("Finished. Took {}", human_duration(report.elapsed.as_secs_f64()));
        report
    }

    async fn run_points(
        &self,
        session: &ScanSession,
        device: &dyn NmrSpectrometer,
        sequences: &[Sequence],
        readers: &[Box<dyn FieldReader>],
        completed: &mut usize,
    ) -> Result<()> {
        let total = sequences.len();
        let params = device
            .parameters()
            .await
            .context("Failed to read acquisition parameters")?;
        for (i, sequence) in sequences.iter().enumerate() {
            let percent = progress_percent(i, total);
            info!("Scan: {}/{} ({percent:.0}%)", i + 1, total);
            let remaining = estimate_scan_duration(&params, &sequences[i..]);
            info!("ETA: {}", format_duration(remaining));

            self.run_point(session, device, sequence, readers).await?;
            *completed += 1;
        }
        Ok(())
    }

    async fn files_of(&self, session: &ScanSession) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        state
            .open
            .as_ref()
            .filter(|open| open.id == session.id())
            .map(|open| open.files.clone())
            .unwrap_or_default()
    }
}

/// Progress shown before point `index` of `total`; the last point is 100%.
fn progress_percent(index: usize, total: usize) -> f64 {
    if total <= 1 {
        100.0
    } else {
        100.0 * index as f64 / (total - 1) as f64
    }
}

/// Non-negative seconds to a `Duration`; invalid input is zero.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StorageConfig};
    use crate::data::nexus::entries;
    use crate::data::sink::NexusSinkFactory;
    use crate::data::store::tree::TreeBackend;
    use crate::data::store::{FileBackend, HierarchicalFile};
    use crate::experiment::ExperimentContextBuilder;
    use crate::hardware::mock::{MockSensor, MockSpectrometer};
    use crate::hardware::DeviceRegistry;
    use crate::scan::clock::SteppingClock;
    use crate::scan::readers::DeviceReader;
    use crate::sequence::{make_pulse, make_sweep, FieldValue, PulseField};
    use tracing_test::traced_test;

    const DAY: f64 = 86_400.0;

    fn sequences(n: usize) -> Vec<Sequence> {
        let base = Sequence::new(vec![
            make_pulse(5.0, 40.0, 1.0, "0 0 2 2"),
            make_pulse(2.5, 40.0, 50.0, "0 0 0 0"),
        ]);
        let values: Vec<FieldValue> = (0..n).map(|i| FieldValue::Number(50.0 + i as f64)).collect();
        make_sweep(&base, 1usize, PulseField::Delay, &values).unwrap()
    }

    // Three points one day apart, with the environment thermometer failing
    // twice while point 2 is written.
    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn three_point_scan_with_flaky_thermometer() {
        let dir = tempfile::tempdir().unwrap();
        let mut devices = DeviceRegistry::new();
        let thermometer = Arc::new(MockSensor::new(4.2).failing_reads([2, 3]));
        devices.register("temperature", thermometer.clone());

        let settings = Settings {
            storage: StorageConfig {
                output_dir: dir.path().to_path_buf(),
                filename_templates: vec!["scan_{counter}".to_string()],
                ..Default::default()
            },
            experiment: ExperimentContextBuilder::new()
                .proposal("p1")
                .environment("temperature")
                .build(),
            ..Default::default()
        };
        let factory = NexusSinkFactory::from_settings(&settings, Arc::new(devices)).unwrap();
        let controller = ScanController::new(
            Arc::new(factory),
            settings.scan.clone(),
            Arc::new(SteppingClock::new(1_000_000.0, DAY)),
        );
        let nmr = MockSpectrometer::new().with_busy_polls(3);

        let report = controller.run_scan(&nmr, &sequences(3), &[]).await;
        assert!(report.is_complete(), "{report:?}");
        assert_eq!(controller.phase().await, ScanPhase::Idle);

        let file = TreeBackend.open(&report.files[0]).unwrap();
        assert_eq!(entries(&*file).unwrap(), vec!["entry1", "entry2", "entry3"]);
        for entry in ["entry1", "entry2", "entry3"] {
            let reals = file
                .read_dataset(&format!("{entry}/nmr_data/tnmr_reals"))
                .unwrap();
            assert_eq!(reals.as_floats().map(<[f64]>::len), Some(64));
            assert_eq!(
                file.read_dataset(&format!("{entry}/environment/temperature"))
                    .unwrap()
                    .as_floats(),
                Some(&[4.2][..])
            );
        }
        assert_eq!(
            file.read_dataset("entry2/nmr_data/tnmr_sequence/1/delay_time")
                .unwrap()
                .as_floats(),
            Some(&[51.0][..])
        );
        assert_eq!(thermometer.read_count(), 5);

        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("Trying to read temperature again")).count() {
                2 => Ok(()),
                n => Err(format!("expected 2 retry warnings, saw {n}")),
            }
        });
        assert!(logs_contain("Scan: 3/3"));
        assert!(logs_contain("Finished. Took"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn failing_reader_only_drops_its_field() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage: StorageConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let factory =
            NexusSinkFactory::from_settings(&settings, Arc::new(DeviceRegistry::new())).unwrap();
        let controller = ScanController::new(
            Arc::new(factory),
            settings.scan.clone(),
            Arc::new(SteppingClock::new(1_000_000.0, DAY)),
        );
        let readers: Vec<Box<dyn FieldReader>> = vec![
            Box::new(DeviceReader::new(
                "environment/axes:temperature",
                Arc::new(MockSensor::new(4.2)),
            )),
            Box::new(DeviceReader::new(
                "environment/field",
                Arc::new(MockSensor::new(9.4).broken()),
            )),
        ];

        let report = controller
            .run_scan(&MockSpectrometer::new(), &sequences(1), &readers)
            .await;
        assert!(report.is_complete());

        let file = TreeBackend.open(&report.files[0]).unwrap();
        assert!(file.exists("entry1/environment/temperature"));
        assert!(!file.exists("entry1/environment/field"));
        assert!(!file.exists("entry1/nmr_data/temperature"));
        assert!(logs_contain("Could not read environment/field"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_interrupts_running_scan() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage: StorageConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let factory =
            NexusSinkFactory::from_settings(&settings, Arc::new(DeviceRegistry::new())).unwrap();
        let controller = Arc::new(ScanController::new(
            Arc::new(factory),
            settings.scan.clone(),
            Arc::new(SteppingClock::new(1_000_000.0, DAY)),
        ));
        // stays busy far longer than the abort delay
        let nmr = Arc::new(MockSpectrometer::new().with_busy_polls(1_000));

        let runner = {
            let controller = Arc::clone(&controller);
            let nmr = Arc::clone(&nmr);
            tokio::spawn(async move { controller.run_scan(nmr.as_ref(), &sequences(2), &[]).await })
        };
        sleep(Duration::from_secs(30)).await;
        controller.abort();

        let report = runner.await.unwrap();
        assert_eq!(report.completed, 0);
        assert!(report.aborted.unwrap().contains("aborted"));
        assert_eq!(controller.phase().await, ScanPhase::Idle);
    }

    #[test]
    fn progress_reaches_full_on_last_point() {
        assert_eq!(progress_percent(0, 3), 0.0);
        assert_eq!(progress_percent(1, 3), 50.0);
        assert_eq!(progress_percent(2, 3), 100.0);
        assert_eq!(progress_percent(0, 1), 100.0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn dropped_scan_closes_its_session() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage: StorageConfig {
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let factory =
            NexusSinkFactory::from_settings(&settings, Arc::new(DeviceRegistry::new())).unwrap();
        let controller = ScanController::new(
            Arc::new(factory),
            settings.scan.clone(),
            Arc::new(SteppingClock::new(1_000_000.0, DAY)),
        );
        let nmr = MockSpectrometer::new().with_busy_polls(1_000);

        let seqs = sequences(2);
        let scan = controller.run_scan(&nmr, &seqs, &[]);
        assert!(tokio::time::timeout(Duration::from_secs(5), scan).await.is_err());

        for _ in 0..100 {
            if controller.open_session().await.is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.open_session().await, None);
        assert_eq!(controller.phase().await, ScanPhase::Idle);
        assert!(logs_contain("Scan cancelled; closing its session"));
    }

    #[test]
    fn seconds_rejects_invalid_input() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(1.5), Duration::from_millis(1500));
    }
}
