//! Integration tests for the scan controller
//!
//! Session ownership, failure handling and nested scans, run against the
//! mock spectrometer with tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;
use tnmr_daq::config::{Settings, StorageConfig};
use tnmr_daq::data::nexus::entries;
use tnmr_daq::data::store::tree::TreeBackend;
use tnmr_daq::data::store::FileBackend;
use tnmr_daq::data::NexusSinkFactory;
use tnmr_daq::error::NmrError;
use tnmr_daq::hardware::mock::MockSpectrometer;
use tnmr_daq::hardware::DeviceRegistry;
use tnmr_daq::scan::{ScanController, ScanPhase, SteppingClock};
use tnmr_daq::sequence::{make_pulse, make_sweep, FieldValue, PulseField, Sequence};

const DAY: f64 = 86_400.0;

fn controller(dir: &std::path::Path) -> Arc<ScanController> {
    let settings = Settings {
        storage: StorageConfig {
            output_dir: dir.to_path_buf(),
            filename_templates: vec!["scan_{counter}".to_string()],
            ..Default::default()
        },
        ..Default::default()
    };
    let factory =
        NexusSinkFactory::from_settings(&settings, Arc::new(DeviceRegistry::new())).unwrap();
    Arc::new(ScanController::new(
        Arc::new(factory),
        settings.scan,
        Arc::new(SteppingClock::new(1_700_000_000.0, DAY)),
    ))
}

fn sequences(n: usize) -> Vec<Sequence> {
    let base = Sequence::new(vec![make_pulse(2.5, 40.0, 100.0, "0 0 0 0")]);
    let widths: Vec<FieldValue> = (1..=n).map(|w| FieldValue::Number(w as f64)).collect();
    make_sweep(&base, 0usize, PulseField::Width, &widths).unwrap()
}

// =============================================================================
// Session ownership
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_only_the_opener_closes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    assert_eq!(controller.phase().await, ScanPhase::Idle);

    let opener = controller.begin(false).await.unwrap();
    assert!(opener.is_opener());
    assert_eq!(controller.phase().await, ScanPhase::Running);

    let joined = controller.begin(true).await.unwrap();
    assert!(!joined.is_opener());
    assert_eq!(joined.id(), opener.id());

    assert!(!controller.finish(&joined).await.unwrap());
    assert_eq!(controller.open_session().await, Some(opener.id()));

    assert!(controller.finish(&opener).await.unwrap());
    assert_eq!(controller.open_session().await, None);
    assert_eq!(controller.phase().await, ScanPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_hard_begin_replaces_open_session() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let nmr = MockSpectrometer::new();
    let sequences = sequences(1);
    let seq = &sequences[0];

    let first = controller.begin(false).await.unwrap();
    let second = controller.begin(false).await.unwrap();
    assert!(second.is_opener());
    assert_ne!(first.id(), second.id());

    let err = controller.run_point(&first, &nmr, seq, &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NmrError>(),
        Some(NmrError::StaleSession(id)) if *id == first.id()
    ));

    controller.finish(&second).await.unwrap();
    let err = controller.run_point(&second, &nmr, seq, &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NmrError>(),
        Some(NmrError::NoOpenSession)
    ));
    // the device was never touched
    assert_eq!(nmr.runs().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_nested_scan_leaves_session_open() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let nmr = MockSpectrometer::new();

    let outer = controller.begin(false).await.unwrap();
    let report = controller.run_scan(&nmr, &sequences(2), &[]).await;
    assert!(report.is_complete(), "{report:?}");

    assert_eq!(controller.open_session().await, Some(outer.id()));
    assert_eq!(controller.points_written().await, 2);

    let report = controller.run_scan(&nmr, &sequences(1), &[]).await;
    assert!(report.is_complete());
    assert_eq!(controller.points_written().await, 3);

    assert!(controller.finish(&outer).await.unwrap());
    let file = TreeBackend.open(&report.files[0]).unwrap();
    assert_eq!(
        entries(&*file).unwrap(),
        vec!["entry1", "entry2", "entry3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_respects_running_scan_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let nmr = Arc::new(MockSpectrometer::new().with_busy_polls(1_000));

    let runner = {
        let controller = Arc::clone(&controller);
        let nmr = Arc::clone(&nmr);
        tokio::spawn(async move { controller.run_scan(nmr.as_ref(), &sequences(2), &[]).await })
    };
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!controller.end(false).await.unwrap());
    assert!(controller.open_session().await.is_some());

    assert!(controller.end(true).await.unwrap());
    assert_eq!(controller.open_session().await, None);

    controller.abort();
    let report = runner.await.unwrap();
    assert!(report.aborted.is_some());
    assert_eq!(report.completed, 0);
    assert!(!controller.end(true).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_forced_end_mid_point_discards_the_point() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    // twenty one-second polls per point
    let nmr = Arc::new(MockSpectrometer::new().with_busy_polls(20));

    let runner = {
        let controller = Arc::clone(&controller);
        let nmr = Arc::clone(&nmr);
        tokio::spawn(async move { controller.run_scan(nmr.as_ref(), &sequences(2), &[]).await })
    };
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(controller.end(true).await.unwrap());

    let report = runner.await.unwrap();
    assert_eq!(report.completed, 0);
    assert!(report
        .aborted
        .as_deref()
        .is_some_and(|reason| reason.contains("No scan session is open")));
    assert_eq!(nmr.runs().await, 1);
    assert_eq!(controller.open_session().await, None);

    let file = TreeBackend.open(&report.files[0]).unwrap();
    assert!(entries(&*file).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_scan_does_not_leave_session_open() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let busy = MockSpectrometer::new().with_busy_polls(1_000);

    let cancelled =
        tokio::time::timeout(Duration::from_secs(5), controller.run_scan(&busy, &sequences(2), &[]))
            .await;
    assert!(cancelled.is_err());

    for _ in 0..100 {
        if controller.open_session().await.is_none() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(controller.open_session().await, None);
    assert!(!controller.end(false).await.unwrap());

    // the next scan opens and closes its own session
    let report = controller.run_scan(&MockSpectrometer::new(), &sequences(1), &[]).await;
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(controller.open_session().await, None);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_read_failure_keeps_written_points() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let nmr = MockSpectrometer::new().fail_read_on_run(2);

    let report = controller.run_scan(&nmr, &sequences(3), &[]).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.completed, 1);
    assert!(report
        .aborted
        .as_deref()
        .is_some_and(|reason| reason.contains("Failed to read signal")));
    assert_eq!(nmr.runs().await, 2);
    assert_eq!(controller.phase().await, ScanPhase::Idle);

    let file = TreeBackend.open(&report.files[0]).unwrap();
    assert_eq!(entries(&*file).unwrap(), vec!["entry1"]);
    assert_eq!(
        file.read_dataset("entry1/nmr_data/tnmr_sequence/0/pulse_width")
            .unwrap()
            .as_floats(),
        Some(&[1.0][..])
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_counter_times_out_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(dir.path());
    let nmr = MockSpectrometer::new().with_stalled_counter();

    let started = tokio::time::Instant::now();
    let report = controller.run_scan(&nmr, &sequences(1), &[]).await;

    assert!(report.is_complete(), "{report:?}");
    // flush timeout is 30s by default
    assert!(started.elapsed() >= Duration::from_secs(30));
}
