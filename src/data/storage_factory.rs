//! Storage backend factory with automatic feature-based registration.
use crate::data::store::tree::TreeBackend;
use crate::data::store::FileBackend;
use crate::error::{AppResult, NmrError};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "storage_hdf5")]
use crate::data::store::hdf5::Hdf5Backend;

type BackendFactory = Box<dyn Fn() -> Arc<dyn FileBackend> + Send + Sync>;

/// Registry of storage backends keyed by format name.
///
/// The JSON tree backend is always present. Formats behind Cargo features
/// are registered when the feature is enabled, so the configured
/// `storage.format` is checked against what this build actually supports.
///
/// # Examples
///
/// ```
/// use tnmr_daq::data::storage_factory::BackendRegistry;
///
/// let registry = BackendRegistry::new();
/// let backend = registry.create("nxjson")?;
/// assert_eq!(backend.extension(), "nxs.json");
/// # Ok::<(), tnmr_daq::error::NmrError>(())
/// ```
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates a new registry and registers every compiled-in backend.
    ///
    /// - always → `nxjson`
    /// - `storage_hdf5` → `hdf5`
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        registry.register("nxjson", || Arc::new(TreeBackend));

        #[cfg(feature = "storage_hdf5")]
        registry.register("hdf5", || Arc::new(Hdf5Backend));

        registry
    }

    /// Registers a custom backend factory.
    pub fn register<F>(&mut self, format: &str, factory: F)
    where
        F: Fn() -> Arc<dyn FileBackend> + Send + Sync + 'static,
    {
        self.factories.insert(format.to_string(), Box::new(factory));
    }

    /// Creates the backend for `format`.
    ///
    /// # Errors
    ///
    /// [`NmrError::FormatNotAvailable`] if the format is unknown or its
    /// feature is not enabled.
    pub fn create(&self, format: &str) -> AppResult<Arc<dyn FileBackend>> {
        self.factories
            .get(format)
            .map(|factory| factory())
            .ok_or_else(|| {
                NmrError::FormatNotAvailable(format.to_string(), self.list_formats().join(", "))
            })
    }

    /// Registered format names, sorted.
    pub fn list_formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.factories.keys().cloned().collect();
        formats.sort();
        formats
    }

    pub fn is_available(&self, format: &str) -> bool {
        self.factories.contains_key(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_backend_always_available() {
        let registry = BackendRegistry::new();
        assert!(registry.is_available("nxjson"));
        assert_eq!(registry.create("nxjson").unwrap().name(), "nxjson");
    }

    #[test]
    #[cfg(feature = "storage_hdf5")]
    fn test_hdf5_available_with_feature() {
        let registry = BackendRegistry::new();
        assert!(registry.is_available("hdf5"));
        assert_eq!(registry.create("hdf5").unwrap().extension(), "nxs");
    }

    #[test]
    fn test_invalid_format_lists_alternatives() {
        let registry = BackendRegistry::new();
        match registry.create("netcdf") {
            Err(NmrError::FormatNotAvailable(format, known)) => {
                assert_eq!(format, "netcdf");
                assert!(known.contains("nxjson"));
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.name())),
        }
    }

    #[test]
    fn test_list_formats_is_sorted() {
        let mut registry = BackendRegistry::new();
        registry.register("alpha", || Arc::new(TreeBackend));
        let formats = registry.list_formats();
        let mut sorted_formats = formats.clone();
        sorted_formats.sort();
        assert_eq!(formats, sorted_formats);
        assert_eq!(formats[0], "alpha");
    }
}
