//! Backend router — builds one backend per configured provider.
//!
//! Models that share a provider share its backend instance, and with it
//! the instance's rate limiter.

use hacxgent_config::AppConfig;
use hacxgent_core::error::ProviderError;
use hacxgent_core::model::{ModelConfig, ProviderConfig};
use hacxgent_core::provider::Backend;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::openai_compat::{OpenAiCompatBackend, RetryPolicy};

/// Routes models to the backend of their provider.
#[derive(Default)]
pub struct BackendRouter {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under a provider name.
    pub fn register(&mut self, provider: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends.insert(provider.into(), backend);
    }

    /// Get the backend for a provider name.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(provider).cloned()
    }

    /// The backend serving `model`.
    pub fn for_model(&self, model: &ModelConfig) -> Result<Arc<dyn Backend>, ProviderError> {
        self.get(&model.provider).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no backend for provider '{}' (model '{}')",
                model.provider, model.name
            ))
        })
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Close every backend.
    pub async fn close_all(&self) {
        for backend in self.backends.values() {
            backend.close().await;
        }
    }
}

/// Read the provider's API key from its named environment variable.
pub fn resolve_api_key(provider: &ProviderConfig) -> String {
    let var = provider.api_key_env_var.trim();
    if var.is_empty() {
        return String::new();
    }
    std::env::var(var).unwrap_or_default()
}

/// Build a backend for one provider.
pub fn build_backend(
    provider: &ProviderConfig,
    timeout: Duration,
    retry: RetryPolicy,
) -> Result<Arc<dyn Backend>, ProviderError> {
    debug!(provider = %provider.name, backend = ?provider.backend, "Building backend");
    let backend = OpenAiCompatBackend::new(provider.clone(), resolve_api_key(provider), timeout)?
        .with_retry(retry);
    Ok(Arc::new(backend))
}

/// Build backends for every configured provider.
pub fn build_from_config(config: &AppConfig) -> Result<BackendRouter, ProviderError> {
    let timeout = Duration::from_secs_f64(config.api_timeout.max(1.0));
    let retry = RetryPolicy {
        max_retries: config.max_retries,
        base_delay: Duration::from_millis(config.retry_base_delay_ms),
    };

    let mut router = BackendRouter::new();
    for provider in &config.providers {
        router.register(provider.name.clone(), build_backend(provider, timeout, retry)?);
    }
    Ok(router)
}
