//! Scan data sink.
//!
//! A sink receives everything a scan produces. [`NexusSink`] writes it into
//! one or more hierarchical files (fan-out: one file per configured name
//! template) using the layout described in [`crate::data::nexus`].
//!
//! # Lifecycle
//!
//! ```text
//! prepare ──> begin ──> put_values* ──> end
//! ```
//!
//! - `prepare` assigns the scan counter, resolves the paths and creates each
//!   file (truncating it) to prove it is writable.
//! - `begin` writes the file header, best effort.
//! - `put_values` writes a batch, then re-samples every detector and
//!   environment device and writes those readings too.
//!
//! Every call opens the files, writes, commits and closes them again. No
//! handle outlives a call, so an interrupted scan leaves complete files.

use crate::config::{Settings, SinkConfig, StorageConfig};
use crate::data::naming::{FileNamer, TemplateNamer};
use crate::data::nexus::{ensure_file_header, HeaderOutcome, NexusWriter};
use crate::data::storage_factory::BackendRegistry;
use crate::data::store::{FileBackend, HierarchicalFile};
use crate::data::value::{TimedValue, ValueBatch};
use crate::error::AppResult;
use crate::experiment::ExperimentContext;
use crate::hardware::DeviceRegistry;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Destination for scan output.
#[async_trait]
pub trait ScanSink: Send + Sync {
    /// Resolve and create the output files.
    async fn prepare(&mut self) -> Result<()>;

    /// Write per-file header information.
    async fn begin(&mut self) -> Result<()>;

    /// Persist one batch of tagged values.
    async fn put_values(&mut self, batch: ValueBatch) -> Result<()>;

    /// Results are carried by `put_values`; nothing to do by default.
    async fn put_results(&mut self, _results: ValueBatch) -> Result<()> {
        Ok(())
    }

    /// Subsets are not tracked; nothing to do by default.
    async fn add_subset(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn end(&mut self) -> Result<()>;

    /// Display name of the output, empty before `prepare`.
    fn short_name(&self) -> &str;

    /// Output files, empty before `prepare`.
    fn paths(&self) -> &[PathBuf];
}

/// Creates one sink per scan.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn create_sink(&self) -> Result<Box<dyn ScanSink>>;
}

/// How often a flaky device read is retried before zero is recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        SinkConfig::default().into()
    }
}

impl From<SinkConfig> for RetryPolicy {
    fn from(config: SinkConfig) -> Self {
        Self {
            max_retries: config.max_read_retries,
            wait: config.retry_wait,
        }
    }
}

/// Sink writing NeXus-style hierarchical files.
pub struct NexusSink {
    backend: Arc<dyn FileBackend>,
    namer: Arc<dyn FileNamer>,
    templates: Vec<String>,
    subdir: String,
    context: ExperimentContext,
    devices: Arc<DeviceRegistry>,
    retry: RetryPolicy,
    files: Vec<PathBuf>,
    short_name: String,
}

impl NexusSink {
    pub fn new(
        backend: Arc<dyn FileBackend>,
        namer: Arc<dyn FileNamer>,
        storage: &StorageConfig,
        context: ExperimentContext,
        devices: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            backend,
            namer,
            templates: storage.filename_templates.clone(),
            subdir: storage.subdir.clone(),
            context,
            devices,
            retry: RetryPolicy::default(),
            files: Vec::new(),
            short_name: String::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Read a registered device, retrying failures. Never fails: a device
    /// that stays unreadable (or is not registered) reads as zero.
    async fn sample_device(&self, name: &str) -> f64 {
        let Some(device) = self.devices.get_readable(name) else {
            warn!(device = name, "Device {name} is not registered. Setting zero.");
            return 0.0;
        };

        let mut retries = 0;
        loop {
            match device.read().await {
                Ok(value) => return value,
                Err(e) if retries < self.retry.max_retries => {
                    retries += 1;
                    warn!(device = name, attempt = retries, error = %e, "Trying to read {name} again");
                    tokio::time::sleep(self.retry.wait).await;
                }
                Err(e) => {
                    warn!(device = name, error = %e, "Failed to read {name}. Setting zero.");
                    return 0.0;
                }
            }
        }
    }

    /// Open every file, apply `op`, commit. Runs on the blocking pool.
    async fn for_each_file<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&mut dyn HierarchicalFile) -> Result<()> + Send + 'static,
    {
        if self.files.is_empty() {
            bail!("Sink has no output files; call prepare() first");
        }
        let backend = Arc::clone(&self.backend);
        let paths = self.files.clone();
        tokio::task::spawn_blocking(move || {
            for path in &paths {
                let mut file = backend.open(path)?;
                op(file.as_mut()).with_context(|| format!("Writing {}", path.display()))?;
                file.commit()
                    .with_context(|| format!("Committing {}", path.display()))?;
            }
            Ok(())
        })
        .await
        .context("Storage task failed")?
    }
}

#[async_trait]
impl ScanSink for NexusSink {
    async fn prepare(&mut self) -> Result<()> {
        let counter = self.namer.assign_counter();
        let named = self.namer.filenames(
            counter,
            &self.templates,
            &self.subdir,
            self.backend.extension(),
        )?;

        for path in &named.paths {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Cannot create directory {}", dir.display()))?;
            }
            self.backend.create(path)?;
            debug!(path = %path.display(), format = self.backend.name(), "Created output file");
        }

        self.files = named.paths;
        self.short_name = named.short_name;
        info!("Writing data to {}", self.short_name);
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        let context = self.context.clone();
        let now = Utc::now();
        let result = self
            .for_each_file(move |file| {
                if ensure_file_header(file, &context, now)? == HeaderOutcome::AlreadyPresent {
                    debug!("File header already present");
                }
                Ok(())
            })
            .await;
        // The header may already exist from an earlier scan into the same file
        if let Err(e) = result {
            warn!(error = %e, "Could not write file header");
        }
        Ok(())
    }

    async fn put_values(&mut self, batch: ValueBatch) -> Result<()> {
        let anchor = batch
            .values()
            .last()
            .map(|v| v.timestamp)
            .unwrap_or_else(|| Utc::now().timestamp_micros() as f64 * 1e-6);

        let mut samples = Vec::new();
        for name in &self.context.detectors {
            let value = self.sample_device(name).await;
            samples.push((format!("detectors/{name}"), TimedValue::new(anchor, value)));
        }
        for name in &self.context.environment {
            let value = self.sample_device(name).await;
            samples.push((format!("environment/{name}"), TimedValue::new(anchor, value)));
        }

        let context = self.context.clone();
        let now = Utc::now();
        self.for_each_file(move |file| {
            let mut writer = NexusWriter::new(file, &context, now);
            for (key, value) in batch.iter().chain(samples.iter().map(|(k, v)| (k, v))) {
                writer.put(key, value)?;
            }
            Ok(())
        })
        .await
    }

    async fn end(&mut self) -> Result<()> {
        info!("Finished writing {}", self.short_name);
        Ok(())
    }

    fn short_name(&self) -> &str {
        &self.short_name
    }

    fn paths(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Builds a [`NexusSink`] per scan from the configuration.
///
/// The experiment context is shared so operators can change users or the
/// device lists between scans; each sink takes a snapshot when created.
pub struct NexusSinkFactory {
    backend: Arc<dyn FileBackend>,
    namer: Arc<dyn FileNamer>,
    storage: StorageConfig,
    retry: RetryPolicy,
    context: Arc<RwLock<ExperimentContext>>,
    devices: Arc<DeviceRegistry>,
}

impl NexusSinkFactory {
    pub fn from_settings(settings: &Settings, devices: Arc<DeviceRegistry>) -> AppResult<Self> {
        let backend = BackendRegistry::new().create(&settings.storage.format)?;
        let namer = Arc::new(TemplateNamer::new(
            settings.storage.output_dir.clone(),
            &settings.experiment.proposal,
            settings.storage.counter_start,
        ));
        Ok(Self {
            backend,
            namer,
            storage: settings.storage.clone(),
            retry: settings.sink.clone().into(),
            context: Arc::new(RwLock::new(settings.experiment.clone())),
            devices,
        })
    }

    /// Shared handle to the experiment context used for new sinks.
    pub fn context(&self) -> Arc<RwLock<ExperimentContext>> {
        Arc::clone(&self.context)
    }
}

#[async_trait]
impl SinkFactory for NexusSinkFactory {
    async fn create_sink(&self) -> Result<Box<dyn ScanSink>> {
        let context = self.context.read().await.clone();
        Ok(Box::new(
            NexusSink::new(
                Arc::clone(&self.backend),
                Arc::clone(&self.namer),
                &self.storage,
                context,
                Arc::clone(&self.devices),
            )
            .with_retry(self.retry),
        ))
    }
}
