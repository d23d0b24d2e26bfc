//! Provider selection from configuration.

use std::sync::Arc;
use std::time::Duration;
use toolbridge_config::LlmConfig;
use toolbridge_core::Provider;
use toolbridge_core::error::ProviderError;

use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the LLM client named by `config.backend`.
pub fn build_from_config(config: &LlmConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.backend.as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::with_timeout(&config.base_url, timeout);
            if let Some(user) = &config.username {
                provider = provider.with_basic_auth(user, config.password.clone());
            }
            Ok(Arc::new(provider))
        }
        "openai" => Ok(Arc::new(OpenAiCompatProvider::with_timeout(
            "openai",
            &config.base_url,
            config.api_key.clone(),
            timeout,
        ))),
        other => Err(ProviderError::NotConfigured(format!(
            "unknown LLM backend '{other}'"
        ))),
    }
}
