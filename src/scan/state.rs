//! Scan lifecycle types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Where the scan controller is in its lifecycle.
///
/// # State Machine
///
/// ```text
/// Idle ──begin──> Opening ──> Running ──finish/end──> Closing ──> Idle
///                    │
///                    └──(sink could not be prepared)──> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    /// No session open
    Idle,
    /// Creating and preparing the sink
    Opening,
    /// Session open, points may be acquired
    Running,
    /// Ending the sink
    Closing,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPhase::Idle => write!(f, "Idle"),
            ScanPhase::Opening => write!(f, "Opening"),
            ScanPhase::Running => write!(f, "Running"),
            ScanPhase::Closing => write!(f, "Closing"),
        }
    }
}

impl ScanPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, ScanPhase::Running)
    }
}

/// Handle to an open scan session.
///
/// Only the handle returned to the caller that actually opened the session
/// has `is_opener` set; joining callers get a handle that cannot close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSession {
    id: Uuid,
    is_opener: bool,
}

impl ScanSession {
    pub(crate) fn new(id: Uuid, is_opener: bool) -> Self {
        Self { id, is_opener }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_opener(&self) -> bool {
        self.is_opener
    }
}

/// Outcome of [`ScanController::run_scan`](super::ScanController::run_scan).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Points whose data reached the sink.
    pub completed: usize,
    pub total: usize,
    /// Why the scan stopped early, if it did.
    pub aborted: Option<String>,
    pub elapsed: Duration,
    /// Files the session wrote to.
    pub files: Vec<PathBuf>,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.completed == self.total
    }
}
