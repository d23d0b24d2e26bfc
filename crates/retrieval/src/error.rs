//! Retrieval client errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Document server unreachable: {0}")]
    Unreachable(String),

    #[error("Query timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Error calling query API: HTTP {status}")]
    Status { status: u16 },

    #[error("Invalid response from document server: {0}")]
    InvalidResponse(String),

    #[error("No search text provided")]
    EmptyQuery,
}

impl RetrievalError {
    /// Errors after which the server is treated as down until the next
    /// successful connect.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Status { status } => matches!(status, 404 | 500 | 502 | 503),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_worthy_statuses() {
        for status in [404, 500, 502, 503] {
            assert!(RetrievalError::Status { status }.is_disconnect(), "{status}");
        }
        assert!(!RetrievalError::Status { status: 400 }.is_disconnect());
        assert!(!RetrievalError::Status { status: 504 }.is_disconnect());
        assert!(RetrievalError::Unreachable("refused".into()).is_disconnect());
        assert!(!RetrievalError::Timeout { attempts: 3 }.is_disconnect());
    }

    #[test]
    fn messages() {
        assert_eq!(
            RetrievalError::Status { status: 502 }.to_string(),
            "Error calling query API: HTTP 502"
        );
        assert_eq!(
            RetrievalError::Timeout { attempts: 2 }.to_string(),
            "Query timed out after 2 attempt(s)"
        );
    }
}
