//! LLM client implementations for Toolbridge.
//!
//! All providers implement the `toolbridge_core::Provider` trait.
//! [`router::build_from_config`] picks the backend named in configuration.

pub mod ollama;
pub mod openai_compat;
pub mod router;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;

use toolbridge_core::error::ProviderError;

/// Map a non-success HTTP status to a provider error.
pub(crate) fn error_for_status(status: u16, body: String, model: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid credentials or insufficient permissions".into(),
        ),
        404 => ProviderError::ModelNotFound(model.to_string()),
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn error_for_request(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Decode tool-call arguments that arrive as text.
///
/// Invalid JSON is kept verbatim as a string so the reasoning loop can
/// reject it; nothing is guessed.
pub(crate) fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
