//! Per-chat registry of live streamed text.
//!
//! The reconciler owns the authoritative text for the message a chat is
//! currently streaming into. Rendered messages may lag behind it (batched UI
//! updates) or run ahead of it (a history snapshot merged in mid-stream), so
//! every merge takes the longer of the candidates and never shrinks.

use std::collections::{HashMap, HashSet};

use crate::buffer::ChunkedTextBuffer;
use crate::models::{Message, MessageRole};

pub use crate::models::TextField;

/// Buffers for one chat's streaming turn.
#[derive(Debug, Default)]
pub struct ReconciliationBuffer {
    thoughts: ChunkedTextBuffer,
    content: ChunkedTextBuffer,
    active_message_id: Option<String>,
}

impl ReconciliationBuffer {
    pub fn field(&self, field: TextField) -> &ChunkedTextBuffer {
        match field {
            TextField::Thoughts => &self.thoughts,
            TextField::Content => &self.content,
        }
    }

    fn field_mut(&mut self, field: TextField) -> &mut ChunkedTextBuffer {
        match field {
            TextField::Thoughts => &mut self.thoughts,
            TextField::Content => &mut self.content,
        }
    }

    pub fn active_message_id(&self) -> Option<&str> {
        self.active_message_id.as_deref()
    }
}

/// Registry of [`ReconciliationBuffer`]s keyed by chat id.
#[derive(Debug, Default)]
pub struct StreamReconciler {
    buffers: HashMap<String, ReconciliationBuffer>,
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty buffers for `chat_id` if none exist.
    pub fn begin(&mut self, chat_id: &str) {
        self.buffers.entry(chat_id.to_string()).or_default();
    }

    /// Attribute subsequent chunks for `chat_id` to `message_id`.
    ///
    /// Switching to a different message starts a new turn, so the buffers are
    /// emptied; re-setting the same id keeps them.
    pub fn set_active_message(&mut self, chat_id: &str, message_id: &str) {
        let buffer = self.buffers.entry(chat_id.to_string()).or_default();
        if buffer.active_message_id.as_deref() == Some(message_id) {
            return;
        }
        buffer.thoughts.clear();
        buffer.content.clear();
        buffer.active_message_id = Some(message_id.to_string());
    }

    pub fn active_message(&self, chat_id: &str) -> Option<&str> {
        self.buffers
            .get(chat_id)
            .and_then(|b| b.active_message_id.as_deref())
    }

    /// Append raw chunk text. Returns false if the chat has no buffers.
    pub fn push(&mut self, chat_id: &str, field: TextField, text: &str) -> bool {
        match self.buffers.get_mut(chat_id) {
            Some(buffer) => {
                buffer.field_mut(field).append(text);
                true
            }
            None => false,
        }
    }

    /// Replace a field's text with `text` if it is longer than what is
    /// buffered. Returns whether the buffer changed.
    pub fn advance_to(&mut self, chat_id: &str, field: TextField, text: &str) -> bool {
        match self.buffers.get_mut(chat_id) {
            Some(buffer) if text.len() > buffer.field(field).len() => {
                buffer.field_mut(field).reset_to(text);
                true
            }
            _ => false,
        }
    }

    /// Accumulated text for a field. May be ahead of the rendered message.
    pub fn buffered_text(&self, chat_id: &str, field: TextField) -> Option<&str> {
        self.buffers.get(chat_id).map(|b| b.field(field).as_str())
    }

    pub fn buffered_len(&self, chat_id: &str, field: TextField) -> usize {
        self.buffers
            .get(chat_id)
            .map(|b| b.field(field).len())
            .unwrap_or(0)
    }

    /// Move the active target from `old_id` to `new_id`, keeping the text.
    ///
    /// Used when the store reveals the real id of a message streamed under a
    /// placeholder. No-op (returns false) if `old_id` is not the active target.
    pub fn retarget(&mut self, chat_id: &str, old_id: &str, new_id: &str) -> bool {
        match self.buffers.get_mut(chat_id) {
            Some(buffer) if buffer.active_message_id.as_deref() == Some(old_id) => {
                tracing::debug!(
                    chat_id = %chat_id,
                    old_id = %old_id,
                    new_id = %new_id,
                    "Retargeting stream buffer"
                );
                buffer.active_message_id = Some(new_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Collapse the buffers at the end of a turn; text stays readable.
    pub fn finish_turn(&mut self, chat_id: &str) {
        if let Some(buffer) = self.buffers.get_mut(chat_id) {
            buffer.thoughts.finalize();
            buffer.content.finalize();
        }
    }

    /// Drop all state for `chat_id`.
    pub fn clear(&mut self, chat_id: &str) {
        self.buffers.remove(chat_id);
    }

    pub fn contains(&self, chat_id: &str) -> bool {
        self.buffers.contains_key(chat_id)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Merge a freshly loaded snapshot into the live message list.
    ///
    /// Snapshot order is kept. For a message present on both sides each text
    /// field takes the longest of the live text, the snapshot text and (for the
    /// active message) the buffered text. Live-only messages follow the
    /// snapshot in their original order. A local user message whose id was
    /// never confirmed is matched to a snapshot user message with the same
    /// content.
    pub fn merge_snapshot(
        &self,
        chat_id: &str,
        live: &[Message],
        snapshot: Vec<Message>,
    ) -> Vec<Message> {
        let buffer = self.buffers.get(chat_id);
        let active_id = buffer.and_then(|b| b.active_message_id.as_deref());
        let mut consumed: HashSet<&str> = HashSet::new();
        let mut merged = Vec::with_capacity(snapshot.len() + live.len());

        for stored in snapshot {
            let matched = live
                .iter()
                .find(|m| m.id == stored.id && !consumed.contains(m.id.as_str()))
                .or_else(|| {
                    live.iter().find(|m| {
                        m.is_placeholder
                            && m.role == MessageRole::User
                            && stored.role == MessageRole::User
                            && m.content == stored.content
                            && !consumed.contains(m.id.as_str())
                    })
                });

            let mut message = match matched {
                Some(local) => {
                    consumed.insert(local.id.as_str());
                    merge_pair(local, stored)
                }
                None => stored,
            };
            if let (Some(buffer), Some(active)) = (buffer, active_id) {
                if message.id == active {
                    apply_buffer(&mut message, buffer);
                }
            }
            merged.push(message);
        }

        for local in live {
            if consumed.contains(local.id.as_str()) {
                continue;
            }
            let mut message = local.clone();
            if let (Some(buffer), Some(active)) = (buffer, active_id) {
                if message.id == active {
                    apply_buffer(&mut message, buffer);
                }
            }
            merged.push(message);
        }

        merged
    }
}

/// Combine a live message with its stored counterpart.
fn merge_pair(local: &Message, stored: Message) -> Message {
    let mut message = stored;
    for field in [TextField::Thoughts, TextField::Content] {
        if local.text(field).len() > message.text(field).len() {
            message.set_text(field, local.text(field).to_string());
        }
    }
    // Streaming flags and errors are client-side facts the store does not know.
    message.is_streaming = local.is_streaming;
    message.is_streaming_response = local.is_streaming_response;
    if message.error.is_none() {
        message.error = local.error.clone();
    }
    message
}

fn apply_buffer(message: &mut Message, buffer: &ReconciliationBuffer) {
    for field in [TextField::Thoughts, TextField::Content] {
        let buffered = buffer.field(field);
        if buffered.len() > message.text(field).len() {
            message.set_text(field, buffered.as_str().to_string());
        }
    }
}
