//! Provider selection: builds the configured LLM backend.

use crate::echo::EchoProvider;
use crate::openai_compat::{DEFAULT_BASE_URL, OpenAiCompatProvider};
use nexus_config::ModelConfig;
use nexus_core::error::ProviderError;
use nexus_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

/// Build the provider named by `[model].provider`.
///
/// `openai_compat` talks to any `/v1/chat/completions` endpoint; local
/// servers (Ollama, vLLM, llama.cpp) are reached by pointing `api_url` at
/// them. A remote endpoint needs an API key.
pub fn build_from_config(config: &ModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider: Arc<dyn Provider> = match config.provider.as_str() {
        "echo" => Arc::new(EchoProvider),
        "openai_compat" => {
            let base_url = config.api_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
            let api_key = match (&config.api_key, is_local(base_url)) {
                (Some(key), _) => key.clone(),
                (None, true) => String::new(),
                (None, false) => {
                    return Err(ProviderError::NotConfigured(format!(
                        "no API key for {base_url} (set NEXUS_API_KEY or [model].api_key)"
                    )));
                }
            };
            Arc::new(OpenAiCompatProvider::new("openai_compat", base_url, api_key))
        }
        other => {
            return Err(ProviderError::NotConfigured(format!(
                "unknown provider '{other}' (expected openai_compat or echo)"
            )));
        }
    };

    info!(provider = provider.name(), model = %config.model, "LLM provider ready");
    Ok(provider)
}

/// Whether `base_url` points at this machine.
pub fn is_local(base_url: &str) -> bool {
    base_url.contains("://localhost") || base_url.contains("://127.0.0.1")
}
