//! Custom error types for the application.
//!
//! `NmrError` collects the failures that belong to this crate's own domain:
//! configuration problems, misuse of the sequence helpers, scan-session
//! bookkeeping and storage-format selection. Device and storage I/O is
//! reported through `anyhow::Result` with context attached at the call site,
//! and `NmrError` converts into `anyhow::Error` with `?` where the two meet.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and
//!   semantic validation failures respectively.
//! - **`SweepIndexOutOfRange`** / **`SweepValueType`** / **`UnknownPulseField`**:
//!   programming-usage errors from `sequence::make_sweep`. They fail fast and
//!   are not meant to be recovered from.
//! - **`NoOpenSession`** / **`StaleSession`**: a scan point was submitted
//!   against a session that is not (or no longer) open.
//! - **`Aborted`**: the operator interrupted a running scan.
//! - **`FormatNotAvailable`**: the configured storage format was not compiled in.

use thiserror::Error;
use uuid::Uuid;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, NmrError>;

#[derive(Error, Debug)]
pub enum NmrError {
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sequence file error: {0}")]
    SequenceFile(#[from] toml::de::Error),

    #[error("Sweep index {index} is out of range for a sequence of {len} pulses")]
    SweepIndexOutOfRange { index: usize, len: usize },

    #[error("Pulse field '{field}' expects a {expected} value")]
    SweepValueType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Unknown pulse field '{0}'")]
    UnknownPulseField(String),

    #[error("No scan session is open")]
    NoOpenSession,

    #[error("Scan session {0} is no longer open")]
    StaleSession(Uuid),

    #[error("Scan aborted by operator")]
    Aborted,

    #[error("Storage format '{0}' is not available. Known formats: {1}")]
    FormatNotAvailable(String, String),

    #[error("Instrument error: {0}")]
    Instrument(String),
}

impl From<figment::Error> for NmrError {
    fn from(value: figment::Error) -> Self {
        NmrError::Config(Box::new(value))
    }
}

impl NmrError {
    /// Whether an operator can reasonably retry after this error.
    ///
    /// Usage errors and missing features are permanent; session and device
    /// problems usually clear once the instrument is back.
    pub fn can_recover(&self) -> bool {
        matches!(
            self,
            NmrError::NoOpenSession
                | NmrError::StaleSession(_)
                | NmrError::Aborted
                | NmrError::Instrument(_)
                | NmrError::Io(_)
        )
    }
}
