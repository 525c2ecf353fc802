//! Named device lookup.
//!
//! The sink re-samples every detector and environment device by name on each
//! write; this registry is where those names resolve to live devices.

use std::collections::HashMap;
use std::sync::Arc;

use crate::hardware::capabilities::Readable;

/// Scalar devices by name.
#[derive(Default, Clone)]
pub struct DeviceRegistry {
    readables: HashMap<String, Arc<dyn Readable>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a device under `id`.
    pub fn register(&mut self, id: &str, device: Arc<dyn Readable>) {
        self.readables.insert(id.to_string(), device);
    }

    pub fn get_readable(&self, id: &str) -> Option<Arc<dyn Readable>> {
        self.readables.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.readables.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn list_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.readables.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.readables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readables.is_empty()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.list_devices())
            .finish()
    }
}
