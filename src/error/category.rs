//! Error category classification.
//!
//! Categories decide how the session controller reacts to a failure: most of
//! them are handled silently, only server-side failures surface to the user.

use std::fmt;

/// High-level classification of stream and backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A task was cancelled by a chat switch or an explicit stop.
    /// Expected; never an error from the user's point of view.
    Cancellation,

    /// Connection, timeout or I/O failure while talking to the backend.
    Transport,

    /// Malformed frame or payload. Logged and skipped.
    Protocol,

    /// The backend reported a failure (HTTP 5xx or an `error` event).
    Server,

    /// A result arrived for a request that has since been superseded.
    Stale,

    /// A merge would have shrunk already-rendered text and was rejected.
    Anomaly,
}

impl ErrorCategory {
    /// Whether failures in this category reach the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ErrorCategory::Server | ErrorCategory::Transport)
    }

    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport | ErrorCategory::Server)
    }

    /// Short label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Cancellation => "cancellation",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Server => "server",
            ErrorCategory::Stale => "stale",
            ErrorCategory::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
