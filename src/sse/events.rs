//! Typed stream events.
//!
//! Each frame payload is a JSON object with a `type` discriminator and the id
//! of the chat it belongs to:
//!
//! ```text
//! {"type":"answer","chatId":"c1","content":"Hel","correlationId":"..."}
//! {"type":"complete","chatId":"c1","messageId":"42"}
//! {"type":"chat_state","chatId":"c1","state":"static"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StreamParseError;
use crate::models::{ChatState, TextField};

/// Incremental text for the thoughts or answer field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    #[serde(alias = "chat_id")]
    pub chat_id: String,
    #[serde(default, alias = "delta", alias = "text")]
    pub content: String,
    #[serde(default, alias = "correlation_id")]
    pub correlation_id: Option<String>,
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
}

/// Turn finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    #[serde(alias = "chat_id")]
    pub chat_id: String,
    /// Persisted id of the assistant message, when the store has assigned one.
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default, alias = "correlation_id")]
    pub correlation_id: Option<String>,
}

/// Turn failed on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(alias = "chat_id")]
    pub chat_id: String,
    #[serde(default, alias = "content", alias = "error")]
    pub message: String,
    #[serde(default, alias = "correlation_id")]
    pub correlation_id: Option<String>,
}

/// Out-of-band state push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatePayload {
    #[serde(alias = "chat_id")]
    pub chat_id: String,
    pub state: ChatState,
    #[serde(default, alias = "correlation_id")]
    pub correlation_id: Option<String>,
}

/// Event decoded from one frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thoughts(TextChunk),
    Answer(TextChunk),
    Complete(CompletePayload),
    Error(ErrorPayload),
    ChatState(ChatStatePayload),
}

impl StreamEvent {
    /// The `type` value as sent on the wire.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::Thoughts(_) => "thoughts",
            StreamEvent::Answer(_) => "answer",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error(_) => "error",
            StreamEvent::ChatState(_) => "chat_state",
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            StreamEvent::Thoughts(c) | StreamEvent::Answer(c) => &c.chat_id,
            StreamEvent::Complete(p) => &p.chat_id,
            StreamEvent::Error(p) => &p.chat_id,
            StreamEvent::ChatState(p) => &p.chat_id,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Thoughts(c) | StreamEvent::Answer(c) => c.correlation_id.as_deref(),
            StreamEvent::Complete(p) => p.correlation_id.as_deref(),
            StreamEvent::Error(p) => p.correlation_id.as_deref(),
            StreamEvent::ChatState(p) => p.correlation_id.as_deref(),
        }
    }

    /// Target field and delta for text-bearing events.
    pub fn text_chunk(&self) -> Option<(TextField, &str)> {
        match self {
            StreamEvent::Thoughts(c) => Some((TextField::Thoughts, c.content.as_str())),
            StreamEvent::Answer(c) => Some((TextField::Content, c.content.as_str())),
            _ => None,
        }
    }
}

const KNOWN_TYPES: [&str; 5] = ["thoughts", "answer", "complete", "error", "chat_state"];

/// Decode one frame payload.
pub fn parse_stream_event(payload: &str) -> Result<StreamEvent, StreamParseError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| StreamParseError::InvalidJson {
            event_type: "unknown".to_string(),
            detail: e.to_string(),
        })?;

    let event_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(StreamParseError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&event_type.as_str()) {
        return Err(StreamParseError::UnknownEventType(event_type));
    }

    serde_json::from_value(value).map_err(|e| StreamParseError::InvalidJson {
        event_type,
        detail: e.to_string(),
    })
}
