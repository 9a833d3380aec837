//! Streaming-related error types.
//!
//! Covers frame/payload decoding failures and the outcomes a stream task can
//! report back to the session controller.

use thiserror::Error;

use super::backend::BackendError;
use super::category::ErrorCategory;

/// Failure to decode one event payload. The stream loop logs it and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamParseError {
    /// Payload has no `type` field.
    #[error("Event payload has no type field")]
    MissingType,

    /// Payload `type` is not one this client understands.
    #[error("Unknown stream event type: {0}")]
    UnknownEventType(String),

    /// Payload is not valid JSON, or does not match the event's shape.
    #[error("Invalid JSON for event '{event_type}': {detail}")]
    InvalidJson { event_type: String, detail: String },
}

/// Failure modes of a streaming turn.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// The task was cancelled by a chat switch or explicit stop.
    #[error("Stream cancelled")]
    Cancelled,

    /// The connection failed or dropped mid-stream.
    #[error("Stream transport failed: {0}")]
    Transport(String),

    /// A payload could not be decoded.
    #[error("Stream parse error: {0}")]
    Parse(#[from] StreamParseError),

    /// The server sent an `error` event.
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// The result belongs to a superseded request.
    #[error("Stale result for chat {chat_id}")]
    Stale { chat_id: String },

    /// A merge would have shrunk already-rendered text.
    #[error("Merge would shrink text from {previous} to {proposed} bytes")]
    MergeRegression { previous: usize, proposed: usize },
}

impl StreamError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Cancelled => ErrorCategory::Cancellation,
            StreamError::Transport(_) => ErrorCategory::Transport,
            StreamError::Parse(_) => ErrorCategory::Protocol,
            StreamError::Backend { .. } => ErrorCategory::Server,
            StreamError::Stale { .. } => ErrorCategory::Stale,
            StreamError::MergeRegression { .. } => ErrorCategory::Anomaly,
        }
    }

    /// Whether this failure ends the turn with an inline error message.
    pub fn is_user_visible(&self) -> bool {
        self.category().is_user_visible()
    }

    /// Message rendered inline when the turn ends with this error.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Transport(_) => {
                "Connection to the server was lost. The response may be incomplete.".to_string()
            }
            StreamError::Backend { message } => format!("Server error: {}", message),
            other => other.to_string(),
        }
    }

    /// Short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::Cancelled => "E_STREAM_CANCELLED",
            StreamError::Transport(_) => "E_STREAM_TRANSPORT",
            StreamError::Parse(_) => "E_STREAM_PARSE",
            StreamError::Backend { .. } => "E_STREAM_BACKEND",
            StreamError::Stale { .. } => "E_STREAM_STALE",
            StreamError::MergeRegression { .. } => "E_STREAM_REGRESSION",
        }
    }
}

impl From<BackendError> for StreamError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Http(crate::traits::HttpError::Cancelled) => StreamError::Cancelled,
            BackendError::Http(e) => StreamError::Transport(e.to_string()),
            other => StreamError::Backend {
                message: other.to_string(),
            },
        }
    }
}
