//! Scan data: value model, key parsing and the hierarchical file sink.
pub mod key;
pub mod naming;
pub mod nexus;
pub mod sink;
pub mod storage_factory;
pub mod store;
pub mod value;

pub use sink::{NexusSink, NexusSinkFactory, ScanSink, SinkFactory};
pub use value::{TimedValue, Value, ValueBatch};
