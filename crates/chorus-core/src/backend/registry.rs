//! Backend factory
//!
//! Adapter selection is a pure lookup on the provider name; nothing else in
//! the crate branches on provider identity.

use super::ollama::DEFAULT_BASE_URL as OLLAMA_BASE_URL;
use super::{BackendError, OllamaBackend, OpenAiBackend, SharedBackend};
use crate::config::BackendSettings;
use std::sync::Arc;

/// Detect the provider from a model name
pub fn provider_from_model(model: &str) -> &'static str {
    let model = model.to_lowercase();

    if model.contains("claude") {
        "anthropic"
    } else if model.contains("gemini") {
        "google"
    } else if ["gpt", "o1", "o3"].iter().any(|p| model.contains(p)) {
        "openai"
    } else if model.contains("grok") {
        "xai"
    } else {
        "openai"
    }
}

/// Create a backend from its settings
pub fn create_backend(settings: &BackendSettings) -> Result<SharedBackend, BackendError> {
    let provider = settings
        .kind
        .clone()
        .unwrap_or_else(|| provider_from_model(&settings.model).to_string());

    match provider.to_lowercase().as_str() {
        "openai" => {
            let mut backend =
                OpenAiBackend::from_key_or_env(settings.api_key.as_deref(), &settings.model)?
                    .with_temperature(settings.temperature)
                    .with_max_tokens(settings.max_tokens);
            if let Some(url) = settings.base_url.as_deref() {
                backend = backend.with_base_url(url);
            }
            Ok(Arc::new(backend))
        }
        "ollama" => {
            let url = settings.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            Ok(Arc::new(
                OllamaBackend::new(url, &settings.model).with_temperature(settings.temperature),
            ))
        }
        other => Err(BackendError::UnsupportedProvider(other.to_string())),
    }
}
