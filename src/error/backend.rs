//! Errors returned by the backing store and stream endpoints.

use thiserror::Error;

use crate::traits::HttpError;

use super::category::ErrorCategory;

/// Failure of a backend request.
///
/// `Clone` so a single coalesced request can hand the same outcome to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// The backend answered with a non-success status.
    #[error("Server error ({status}): {message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(String),

    /// The chat does not exist on the backend.
    #[error("Chat not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BackendError::Http(HttpError::Cancelled) => ErrorCategory::Cancellation,
            BackendError::Http(_) => ErrorCategory::Transport,
            BackendError::Status { .. } | BackendError::NotFound(_) => ErrorCategory::Server,
            BackendError::Json(_) => ErrorCategory::Protocol,
        }
    }

    /// Short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            BackendError::Http(_) => "E_BACKEND_HTTP",
            BackendError::Status { .. } => "E_BACKEND_STATUS",
            BackendError::Json(_) => "E_BACKEND_JSON",
            BackendError::NotFound(_) => "E_BACKEND_NOT_FOUND",
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BackendError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Server error (503): unavailable");
        assert_eq!(
            BackendError::NotFound("chat-1".to_string()).to_string(),
            "Chat not found: chat-1"
        );
    }

    #[test]
    fn test_category() {
        assert_eq!(
            BackendError::Http(HttpError::Cancelled).category(),
            ErrorCategory::Cancellation
        );
        assert_eq!(
            BackendError::Http(HttpError::Timeout("slow".to_string())).category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            BackendError::Json("bad".to_string()).category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn test_from_serde_error() {
        let err: BackendError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, BackendError::Json(_)));
        assert_eq!(err.error_code(), "E_BACKEND_JSON");
    }
}
