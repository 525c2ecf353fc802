//! CLI Entry Point for tnmr-daq
//!
//! Provides command-line interface for:
//! - Showing the pulse tables and ETA of a sequence file
//! - Simulating a scan against the mock spectrometer, writing real output files
//!
//! # Usage
//!
//! ```bash
//! tnmr-daq show config/sequences/t2_sweep.toml
//! tnmr-daq simulate config/sequences/t2_sweep.toml --output /tmp/nmr
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tnmr_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use tnmr_daq::data::NexusSinkFactory;
use tnmr_daq::hardware::mock::{MockSensor, MockSpectrometer};
use tnmr_daq::hardware::DeviceRegistry;
use tnmr_daq::logging;
use tnmr_daq::scan::{ScanController, SystemClock};
use tnmr_daq::sequence::{
    estimate_scan_duration, format_duration, render_sequence, AcquisitionParams, SequenceFile,
};
use tracing::{info, warn};

/// Value reported by every simulated detector and environment sensor.
const MOCK_SENSOR_VALUE: f64 = 295.0;

#[derive(Parser)]
#[command(name = "tnmr-daq")]
#[command(about = "TNMR scan driver with NeXus-style data files", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pulse table and estimated duration of every sequence in a file
    Show {
        /// Path to a .toml sequence file
        file: PathBuf,
    },

    /// Run the sequences against the mock spectrometer and write data files
    Simulate {
        /// Path to a .toml sequence file
        file: PathBuf,

        /// Override `storage.output_dir`
        #[arg(long)]
        output: Option<PathBuf>,

        /// Status polling interval of the mock spectrometer, in seconds
        #[arg(long, default_value = "0.05")]
        poll_interval: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    settings.validate()?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Show { file } => show(&file),
        Commands::Simulate {
            file,
            output,
            poll_interval,
        } => simulate(settings, &file, output, poll_interval).await,
    }
}

fn show(path: &Path) -> Result<()> {
    let sequences = SequenceFile::load(path)?.sequences()?;
    let params = AcquisitionParams::default();

    for (i, sequence) in sequences.iter().enumerate() {
        println!("Sequence {}/{}", i + 1, sequences.len());
        println!("{}", render_sequence(sequence, &params));
    }
    println!(
        "Total for {} sequence(s): {}",
        sequences.len(),
        format_duration(estimate_scan_duration(&params, &sequences))
    );
    Ok(())
}

async fn simulate(
    mut settings: Settings,
    path: &Path,
    output: Option<PathBuf>,
    poll_interval: f64,
) -> Result<()> {
    let sequences = SequenceFile::load(path)?.sequences()?;
    if let Some(dir) = output {
        settings.storage.output_dir = dir;
    }
    settings.scan.settle_delay = Duration::ZERO;

    let mut devices = DeviceRegistry::new();
    for name in settings
        .experiment
        .detectors
        .iter()
        .chain(&settings.experiment.environment)
    {
        devices.register(name, Arc::new(MockSensor::new(MOCK_SENSOR_VALUE)));
    }
    info!(devices = ?devices.list_devices(), "Mock sensors registered");

    let factory = NexusSinkFactory::from_settings(&settings, Arc::new(devices))?;
    let controller = Arc::new(ScanController::new(
        Arc::new(factory),
        settings.scan.clone(),
        Arc::new(SystemClock),
    ));

    let on_interrupt = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting scan");
            on_interrupt.abort();
        }
    });

    let device = MockSpectrometer::new().with_params(AcquisitionParams {
        poll_interval,
        ..AcquisitionParams::default()
    });
    let report = controller.run_scan(&device, &sequences, &[]).await;

    println!(
        "Points written: {}/{} in {:.1}s",
        report.completed,
        report.total,
        report.elapsed.as_secs_f64()
    );
    for file in &report.files {
        println!("  {}", file.display());
    }
    if let Some(reason) = &report.aborted {
        println!("Scan stopped early: {reason}");
    }
    Ok(())
}
