use serde::{Deserialize, Serialize};

use super::message::HistoryMessage;
use super::session::ChatState;

/// Body of `POST /v1/chats/{id}/stream`.
///
/// With a `message` the backend starts a new turn; without one it attaches the
/// caller to the turn already running for the chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Id the client assigned to the assistant placeholder for this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Correlation id echoed back in every event of this stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Opaque provider settings forwarded to the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<serde_json::Value>,
}

impl StreamRequest {
    /// Start a new turn with `message`.
    pub fn new_turn(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach to the turn already running on the server.
    pub fn attach() -> Self {
        Self::default()
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_provider_options(mut self, options: Option<serde_json::Value>) -> Self {
        self.provider_options = options;
        self
    }

    pub fn is_attach(&self) -> bool {
        self.message.is_none()
    }
}

/// Body of `GET /v1/chats/{id}/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// Body of `GET /v1/chats/{id}/state`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionStateResponse {
    pub state: ChatState,
}
