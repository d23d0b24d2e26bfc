//! Error types for the Toolbridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Propagation policy: [`ToolError`] and most [`AdapterError`]s are absorbed
//! into the transcript by the reasoning loop. Only [`ProviderError`] and
//! transport-level [`AdapterError`]s escape an exchange as [`Error`].

use thiserror::Error;

/// The top-level error type for all Toolbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Adapter transport errors ---
    #[error("Transport failure in adapter '{adapter}': {source}")]
    Transport {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool not configured: {0}")]
    NotConfigured(String),
}

/// Failures raised by a [`ToolAdapter`](crate::adapter::ToolAdapter).
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The adapter has never connected, or its backend went away.
    #[error("Adapter not connected: {0}")]
    NotConnected(String),

    /// Connecting (spawning, handshaking, reaching the server) failed.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The adapter does not provide the requested tool.
    #[error("Unknown tool '{0}' for this adapter")]
    UnknownTool(String),

    /// The backend answered with an error for this call.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The call did not complete in time.
    #[error("Call timed out after {0}s")]
    Timeout(u64),

    /// The communication channel itself broke mid-call.
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl AdapterError {
    /// Whether this failure means the exchange cannot continue at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
