//! Notifications delivered to the rendering layer.

use crate::models::{ChatState, Message, TextField};

/// Something the renderer should repaint.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The chat's turn moved to a new state.
    StateChanged { chat_id: String, state: ChatState },
    /// A streamed field has new text. `text` is the full field value.
    TextUpdated {
        chat_id: String,
        message_id: String,
        field: TextField,
        text: String,
    },
    /// A locally generated message id was replaced by the store's id.
    MessageRetargeted {
        chat_id: String,
        old_id: String,
        new_id: String,
    },
    /// A history snapshot was merged; `messages` is the full merged list.
    MessagesReplaced {
        chat_id: String,
        messages: Vec<Message>,
    },
    /// The turn ended with an error. Partial text stays on the message.
    StreamFailed {
        chat_id: String,
        message_id: String,
        error: String,
    },
    /// History could not be loaded. Live messages are untouched.
    HistoryFailed { chat_id: String, error: String },
}

impl SessionEvent {
    pub fn chat_id(&self) -> &str {
        match self {
            SessionEvent::StateChanged { chat_id, .. }
            | SessionEvent::TextUpdated { chat_id, .. }
            | SessionEvent::MessageRetargeted { chat_id, .. }
            | SessionEvent::MessagesReplaced { chat_id, .. }
            | SessionEvent::StreamFailed { chat_id, .. }
            | SessionEvent::HistoryFailed { chat_id, .. } => chat_id,
        }
    }
}
