//! Hardware interfaces.
//!
//! The scan driver only sees the capability traits in [`capabilities`];
//! concrete drivers live outside this crate. [`mock`] provides simulated
//! devices for tests and dry runs.

pub mod capabilities;
pub mod mock;
pub mod registry;

pub use capabilities::{Acquisition, DeviceStatus, NmrSpectrometer, Readable, SampleInfo};
pub use registry::DeviceRegistry;
