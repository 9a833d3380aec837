//! Chat-level backend operations.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::models::{ChatState, Message, StreamRequest};

use super::http::ByteStream;

/// The backing store and stream endpoint for chats.
///
/// Implemented by [`crate::backend::BackendClient`] over HTTP and by
/// [`crate::adapters::mock::MockBackend`] in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Current server-side state of the chat's turn.
    async fn session_state(&self, chat_id: &str) -> Result<ChatState, BackendError>;

    /// Persisted messages of the chat, oldest first.
    async fn history(&self, chat_id: &str) -> Result<Vec<Message>, BackendError>;

    /// Open an event stream for the chat. The returned body is raw
    /// `text/event-stream` bytes.
    async fn open_stream(
        &self,
        chat_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream, BackendError>;
}
