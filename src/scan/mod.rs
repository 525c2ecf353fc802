//! Scan driver.
//!
//! [`ScanController`] runs lists of sequences on an [`NmrSpectrometer`]
//! (one point per sequence) and streams each point into a
//! [`ScanSink`](crate::data::ScanSink). Sessions are explicit handles:
//! the caller that opens a session is the only one that closes it, and
//! nested scans simply join the open session.
//!
//! [`NmrSpectrometer`]: crate::hardware::NmrSpectrometer

pub mod clock;
pub mod controller;
pub mod readers;
pub mod state;

pub use clock::{Clock, SteppingClock, SystemClock};
pub use controller::ScanController;
pub use readers::{DeviceReader, FieldError, FieldReader, FnReader};
pub use state::{ScanPhase, ScanReport, ScanSession};
