use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, MessageRole};

/// Lifecycle state of a chat's current turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    /// No turn in progress.
    #[default]
    Static,
    /// Assistant is producing thoughts.
    Thinking,
    /// Assistant is producing the answer.
    Responding,
}

impl ChatState {
    /// A turn is in progress on the server.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, ChatState::Static)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatState::Static => "static",
            ChatState::Thinking => "thinking",
            ChatState::Responding => "responding",
        }
    }
}

/// Client-side view of one chat.
///
/// Created on first navigation to the chat, dropped when the user navigates
/// away or the chat is closed. Stream and history tasks for the chat are
/// tracked by the session controller, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub messages: Vec<Message>,
    pub state: ChatState,
    /// Set once the first history load has been applied.
    pub history_loaded: bool,
    pub opened_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            state: ChatState::Static,
            history_loaded: false,
            opened_at: Utc::now(),
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    /// Most recent assistant message still being produced.
    pub fn in_flight_assistant(&self) -> Option<&Message> {
        self.last_assistant().filter(|m| m.is_in_flight())
    }

    /// Change a message's id, e.g. once the store reveals the real one.
    /// Returns false if no message had `old_id`.
    pub fn rename_message(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.message_mut(old_id) {
            Some(message) => {
                message.id = new_id.to_string();
                message.is_placeholder = false;
                true
            }
            None => false,
        }
    }
}
