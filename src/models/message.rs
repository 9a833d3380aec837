use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{deserialize_id, deserialize_nullable_string};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Text field of an assistant message that a stream writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Thoughts,
    Content,
}

impl TextField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::Thoughts => "thoughts",
            TextField::Content => "content",
        }
    }
}

/// A message as rendered by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Store-assigned id, or a locally generated placeholder until the store
    /// assigns one (see `is_placeholder`).
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub thoughts: Option<String>,
    /// Assistant is still producing thoughts.
    #[serde(default)]
    pub is_streaming: bool,
    /// Assistant is producing the answer. Exclusive with `is_streaming`.
    #[serde(default)]
    pub is_streaming_response: bool,
    /// `id` was generated locally and has not been confirmed by the store.
    #[serde(default)]
    pub is_placeholder: bool,
    /// Set when the turn ended with a server-side error. Partial content is kept.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A user message with a local placeholder id.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            thoughts: None,
            is_streaming: false,
            is_streaming_response: false,
            is_placeholder: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant message about to receive a stream.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            thoughts: None,
            is_streaming: true,
            is_streaming_response: false,
            is_placeholder: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// A persisted message as returned by the store.
    pub fn stored(id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            thoughts: None,
            is_streaming: false,
            is_streaming_response: false,
            is_placeholder: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        self.thoughts = Some(thoughts.into());
        self
    }

    pub fn text(&self, field: TextField) -> &str {
        match field {
            TextField::Thoughts => self.thoughts.as_deref().unwrap_or(""),
            TextField::Content => &self.content,
        }
    }

    pub fn set_text(&mut self, field: TextField, text: String) {
        match field {
            TextField::Thoughts => self.thoughts = Some(text),
            TextField::Content => self.content = text,
        }
    }

    /// Still being produced by the assistant.
    pub fn is_in_flight(&self) -> bool {
        self.is_streaming || self.is_streaming_response
    }

    /// Enter the thoughts phase.
    pub fn begin_thinking(&mut self) {
        self.is_streaming = true;
        self.is_streaming_response = false;
    }

    /// Enter the answer phase.
    pub fn begin_response(&mut self) {
        self.is_streaming = false;
        self.is_streaming_response = true;
    }

    /// Stop streaming, keeping whatever text has arrived.
    pub fn finalize(&mut self) {
        self.is_streaming = false;
        self.is_streaming_response = false;
    }

    /// Terminate with an inline error; partial text is preserved.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.finalize();
        self.error = Some(error.into());
    }
}

/// Message format returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryMessage {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub role: MessageRole,
    #[serde(default, deserialize_with = "deserialize_nullable_string")]
    pub content: String,
    #[serde(default, alias = "reasoning")]
    pub thoughts: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<HistoryMessage> for Message {
    fn from(raw: HistoryMessage) -> Self {
        Message {
            id: raw.id,
            role: raw.role,
            content: raw.content,
            thoughts: raw.thoughts.filter(|t| !t.is_empty()),
            is_streaming: false,
            is_streaming_response: false,
            is_placeholder: false,
            error: None,
            // Server may omit timestamps on older records
            created_at: raw.created_at.unwrap_or_else(Utc::now),
        }
    }
}
