use std::collections::BTreeMap;
use std::sync::Arc;

use skinswap_contracts::{BackendError, ImageData, RequestPayload};

use crate::dryrun::DryrunBackend;
use crate::gemini::GeminiBackend;
use crate::settings::StudioSettings;

/// A generative image service.
///
/// `submit` blocks for the duration of the network call and is invoked from
/// several threads at once during a batch.
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    fn submit(&self, payload: &RequestPayload) -> Result<ImageData, BackendError>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ImageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ImageBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        self.backends.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(settings: &StudioSettings) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiBackend::from_settings(settings));
    backends
}
