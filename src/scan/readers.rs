//! Optional per-point fields.
//!
//! Callers can attach extra readings to every point (sample temperature,
//! magnet field, a note). Each reader reports failure as a [`FieldError`];
//! the driver then leaves that field out of the point and carries on.

use crate::data::value::Value;
use crate::hardware::Readable;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why an optional field could not be read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid value: {0}")]
    Invalid(String),
}

/// A named value fetched once per point.
#[async_trait]
pub trait FieldReader: Send + Sync {
    /// Tagged key the value is stored under (`"environment/axes:temperature"`).
    fn key(&self) -> &str;

    async fn read(&self) -> Result<Value, FieldError>;
}

/// Reader backed by a synchronous closure.
pub struct FnReader<F> {
    key: String,
    read: F,
}

impl<F> FnReader<F>
where
    F: Fn() -> Result<Value, FieldError> + Send + Sync,
{
    pub fn new(key: &str, read: F) -> Self {
        Self {
            key: key.to_string(),
            read,
        }
    }
}

#[async_trait]
impl<F> FieldReader for FnReader<F>
where
    F: Fn() -> Result<Value, FieldError> + Send + Sync,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Value, FieldError> {
        (self.read)()
    }
}

/// Reader that takes one reading from a [`Readable`] device.
pub struct DeviceReader {
    key: String,
    device: Arc<dyn Readable>,
    timeout: Option<Duration>,
}

impl DeviceReader {
    pub fn new(key: &str, device: Arc<dyn Readable>) -> Self {
        Self {
            key: key.to_string(),
            device,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl FieldReader for DeviceReader {
    fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Value, FieldError> {
        let reading = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.device.read())
                .await
                .map_err(|_| FieldError::Timeout(limit))?,
            None => self.device.read().await,
        };
        let value = reading.map_err(|e| FieldError::Device(e.to_string()))?;
        if !value.is_finite() {
            return Err(FieldError::Invalid(format!("{value}")));
        }
        Ok(Value::from(value))
    }
}
