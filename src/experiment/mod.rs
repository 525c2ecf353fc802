//! Experiment-level context consumed by the data sink and the scan driver.

pub mod context;

pub use context::{ExperimentContext, ExperimentContextBuilder};
