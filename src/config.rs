//! Client and controller configuration.
//!
//! Both types use the builder pattern:
//!
//! ```ignore
//! use threadline::config::{ClientConfig, ControllerConfig};
//!
//! let client = ClientConfig::from_env().with_request_timeout(Duration::from_secs(10));
//! let controller = ControllerConfig::default().with_state_wait_timeout(Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::merge::MergeWindow;

/// Environment variable overriding the backend base URL.
pub const BASE_URL_ENV: &str = "THREADLINE_BASE_URL";
/// Environment variable carrying the bearer token.
pub const TOKEN_ENV: &str = "THREADLINE_TOKEN";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Connection settings for [`crate::backend::BackendClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub auth_token: Option<String>,
    /// Timeout for buffered requests (state, history). Streams are not bounded.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL. A trailing slash is stripped.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Defaults overridden by `THREADLINE_BASE_URL` and `THREADLINE_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            config = config.with_base_url(url);
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            config = config.with_auth_token(token);
        }
        config
    }
}

/// Tunables for [`crate::session::SessionController`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Window used when merging a resent chunk into rendered text.
    pub merge_window: MergeWindow,
    /// Poll interval for `wait_for_state`.
    pub state_wait_poll: Duration,
    /// Upper bound for `wait_for_state`.
    pub state_wait_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            merge_window: MergeWindow::default(),
            state_wait_poll: Duration::from_millis(50),
            state_wait_timeout: Duration::from_secs(5),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_merge_window(mut self, window: MergeWindow) -> Self {
        self.merge_window = window;
        self
    }

    pub fn with_state_wait_poll(mut self, poll: Duration) -> Self {
        self.state_wait_poll = poll;
        self
    }

    pub fn with_state_wait_timeout(mut self, timeout: Duration) -> Self {
        self.state_wait_timeout = timeout;
        self
    }
}
