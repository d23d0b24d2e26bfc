//! Error types for subprocess tool-server operations.

use thiserror::Error;
use toolbridge_core::error::AdapterError;

/// Result type for subprocess operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for subprocess operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to spawn the tool-server process.
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    /// The response did not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The process ended before answering.
    #[error("tool server exited ({}){}", exit_label(.code), stderr_suffix(.stderr))]
    ProcessExited { code: Option<i32>, stderr: String },

    /// The process owner went away (its runtime shut down).
    #[error("connection closed")]
    ConnectionClosed,

    /// No response within the request timeout.
    #[error("timeout after {0}s waiting for response")]
    Timeout(u64),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".into(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl McpError {
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the channel to the process is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ProcessExited { .. } | Self::ConnectionClosed | Self::Io(_)
        )
    }
}

impl From<McpError> for AdapterError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::SpawnFailed(msg) => AdapterError::ConnectFailed(msg),
            McpError::Timeout(secs) => AdapterError::Timeout(secs),
            McpError::ServerError { message, .. } => AdapterError::Remote(message),
            e @ (McpError::Protocol(_) | McpError::Json(_)) => AdapterError::Remote(e.to_string()),
            e => AdapterError::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_error_carries_code_and_stderr() {
        let err = McpError::ProcessExited {
            code: Some(3),
            stderr: "fatal: token missing\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "tool server exited (exit code 3): fatal: token missing"
        );

        let silent = McpError::ProcessExited {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(silent.to_string(), "tool server exited (terminated by signal)");
    }

    #[test]
    fn adapter_error_mapping() {
        let transport: AdapterError = McpError::ProcessExited {
            code: Some(1),
            stderr: "boom".into(),
        }
        .into();
        assert!(transport.is_transport());
        assert!(transport.to_string().contains("boom"));

        let remote: AdapterError = McpError::ServerError {
            code: -32000,
            message: "bad repo".into(),
            data: None,
        }
        .into();
        assert!(matches!(remote, AdapterError::Remote(m) if m == "bad repo"));

        let spawn: AdapterError = McpError::spawn_failed("no such file").into();
        assert!(matches!(spawn, AdapterError::ConnectFailed(_)));

        let timeout: AdapterError = McpError::Timeout(9).into();
        assert!(matches!(timeout, AdapterError::Timeout(9)));
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: McpError = json_err.into();
        assert!(matches!(err, McpError::Json(_)));
        assert!(!err.is_transport());
    }
}
