//! # TNMR DAQ Core Library
//!
//! Scan driver and hierarchical data sink for an NMR spectrometer driven
//! through TNMR. The binary (`main.rs`) is a thin CLI over this library;
//! instrument-control frameworks embed the library directly and provide
//! their own [`hardware::NmrSpectrometer`] implementation.
//!
//! ## Crate Structure
//!
//! - **`sequence`**: pulse and sequence value types, parameter sweeps,
//!   duration estimates and TOML sequence files.
//! - **`scan`**: the `ScanController`, which pushes sequences to the
//!   spectrometer, waits for acquisition and streams each point to a sink.
//! - **`data`**: the NeXus-style sink. Values are routed into timestamped
//!   entries of one or more hierarchical files and tagged with plot hints.
//! - **`hardware`**: capability traits for the spectrometer and auxiliary
//!   sensors, a device registry and mock implementations.
//! - **`experiment`**: experiment metadata (proposal, users, device lists).
//! - **`config`**: layered configuration (defaults, TOML file, environment)
//!   loaded with `figment`. See `config::Settings`.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the `NmrError` domain error enum.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
pub mod scan;
pub mod sequence;
