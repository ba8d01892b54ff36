//! Lazily initialized model handles.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ModelSpec, RuntimeConfig};
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};

/// Failure to obtain a usable model.
#[derive(Error, Debug)]
pub enum ModelInitError {
    #[error("Model '{0}' is not in the runtime catalog and no default provider is configured")]
    UnknownModel(String),

    #[error("Failed to initialize model '{model}': {source}")]
    Provider {
        model: String,
        #[source]
        source: ProviderError,
    },
}

/// A ready-to-call model.
#[derive(Clone)]
pub struct ModelHandle {
    /// Id as written in the suite
    pub model_id: String,

    /// Name sent to the backend
    pub api_model: String,

    /// Backend
    pub provider: Arc<dyn LlmProvider>,
}

impl ModelHandle {
    /// Wrap a provider; the backend name equals the id.
    pub fn new(model_id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let model_id = model_id.into();
        Self {
            api_model: model_id.clone(),
            model_id,
            provider,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .field("api_model", &self.api_model)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Model id -> handle, built on first use and reused afterwards.
///
/// Edge models repeat across hardware profiles; each is initialized once
/// per runner.
pub struct ModelCache {
    registry: ProviderRegistry,
    catalog: BTreeMap<String, ModelSpec>,
    default_spec: Option<ModelSpec>,
    handles: Mutex<HashMap<String, Arc<ModelHandle>>>,
}

impl ModelCache {
    /// Build a cache over `registry` using the config's catalog.
    pub fn new(registry: ProviderRegistry, config: &RuntimeConfig) -> Self {
        Self {
            registry,
            catalog: config.models.clone(),
            default_spec: config.default_provider.clone(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register a ready-made handle, bypassing the catalog.
    pub fn insert(&self, handle: ModelHandle) {
        self.handles
            .lock()
            .insert(handle.model_id.clone(), Arc::new(handle));
    }

    /// Return the cached handle or build it from the catalog.
    pub fn get_or_init(&self, model_id: &str) -> Result<Arc<ModelHandle>, ModelInitError> {
        if let Some(handle) = self.handles.lock().get(model_id) {
            return Ok(Arc::clone(handle));
        }

        let spec = self
            .catalog
            .get(model_id)
            .or(self.default_spec.as_ref())
            .ok_or_else(|| ModelInitError::UnknownModel(model_id.to_string()))?;

        let provider = self
            .registry
            .create(&spec.provider, &spec.config)
            .map_err(|source| ModelInitError::Provider {
                model: model_id.to_string(),
                source,
            })?;

        let handle = Arc::new(ModelHandle {
            model_id: model_id.to_string(),
            api_model: spec
                .api_model
                .clone()
                .unwrap_or_else(|| model_id.to_string()),
            provider,
        });
        tracing::debug!(
            model = %model_id,
            provider = %spec.provider,
            "Initialized model"
        );

        // A concurrent caller may have won; keep the first handle.
        let mut handles = self.handles.lock();
        let entry = handles
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(entry))
    }

    /// Number of initialized handles.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// True if nothing has been initialized.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("registry", &self.registry)
            .field("catalog", &self.catalog.keys().collect::<Vec<_>>())
            .field("initialized", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSpec;

    #[test]
    fn test_catalog_lookup_and_reuse() {
        let mut config = RuntimeConfig::default();
        let mut spec = ModelSpec::new("mock");
        spec.api_model = Some("phi3:mini".to_string());
        config.models.insert("phi-3-mini".to_string(), spec);

        let cache = ModelCache::new(ProviderRegistry::with_defaults(), &config);
        let first = cache.get_or_init("phi-3-mini").unwrap();
        let second = cache.get_or_init("phi-3-mini").unwrap();

        assert_eq!(first.api_model, "phi3:mini");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unknown_model_without_default() {
        let cache = ModelCache::new(ProviderRegistry::with_defaults(), &RuntimeConfig::default());
        assert!(matches!(
            cache.get_or_init("nowhere"),
            Err(ModelInitError::UnknownModel(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_default_provider_fallback() {
        let cache = ModelCache::new(ProviderRegistry::with_defaults(), &RuntimeConfig::mock());
        let handle = cache.get_or_init("any-model").unwrap();
        assert_eq!(handle.api_model, "any-model");
        assert_eq!(handle.provider.name(), "mock");
    }

    #[test]
    fn test_unregistered_provider_type() {
        let mut config = RuntimeConfig::default();
        config
            .models
            .insert("m".to_string(), ModelSpec::new("carrier_pigeon"));
        let cache = ModelCache::new(ProviderRegistry::with_defaults(), &config);
        assert!(matches!(
            cache.get_or_init("m"),
            Err(ModelInitError::Provider { .. })
        ));
    }
}
