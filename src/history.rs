//! History loading with request sequencing.
//!
//! Every load for a chat is tagged with a [`HistoryTicket`] carrying the
//! chat's current sequence number. A chat switch advances the sequence, so a
//! result that resolves afterwards no longer matches and is dropped where it
//! is applied. Concurrent loads for the same chat share one backend request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BackendError;
use crate::inflight::{InflightCache, SharedFetch};
use crate::models::Message;
use crate::traits::ChatBackend;

/// Outcome of one history request.
pub type HistoryResult = Result<Vec<Message>, BackendError>;

/// Tag attached to a history load and compared when its result is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryTicket {
    pub chat_id: String,
    pub seq: u64,
}

/// Monotonic per-chat counter.
#[derive(Debug, Default)]
pub struct RequestSequence {
    counters: HashMap<String, u64>,
}

impl RequestSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the counter for `chat_id` and return the new value.
    pub fn advance(&mut self, chat_id: &str) -> u64 {
        let counter = self.counters.entry(chat_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn current(&self, chat_id: &str) -> u64 {
        self.counters.get(chat_id).copied().unwrap_or(0)
    }

    pub fn is_current(&self, ticket: &HistoryTicket) -> bool {
        self.current(&ticket.chat_id) == ticket.seq
    }
}

/// Issues, tracks and validates history loads.
pub struct HistoryLoader {
    backend: Arc<dyn ChatBackend>,
    sequence: RequestSequence,
    /// The load whose result may still be applied, per chat.
    registered: HashMap<String, HistoryTicket>,
    inflight: InflightCache<String, HistoryResult>,
}

impl HistoryLoader {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            sequence: RequestSequence::new(),
            registered: HashMap::new(),
            inflight: InflightCache::new(),
        }
    }

    /// Register a new load for `chat_id`.
    ///
    /// The returned future must be polled (usually from a spawned task) for
    /// the request to make progress. If a load for the chat is already in
    /// flight the future joins it rather than issuing a second request.
    pub fn start(&mut self, chat_id: &str) -> (HistoryTicket, SharedFetch<HistoryResult>) {
        let seq = self.sequence.advance(chat_id);
        let ticket = HistoryTicket {
            chat_id: chat_id.to_string(),
            seq,
        };
        self.registered.insert(chat_id.to_string(), ticket.clone());

        let backend = Arc::clone(&self.backend);
        let key = chat_id.to_string();
        let (fetch, started) = self.inflight.get_or_start(key.clone(), move || async move {
            backend.history(&key).await
        });
        tracing::debug!(chat_id = %chat_id, seq, coalesced = !started, "History load started");
        (ticket, fetch)
    }

    /// Consume the registration for `ticket` if it is still the current load.
    ///
    /// Returns false for a superseded or unregistered ticket; the caller must
    /// then drop the result without side effects.
    pub fn accept(&mut self, ticket: &HistoryTicket) -> bool {
        let registered = self.registered.get(&ticket.chat_id) == Some(ticket);
        if registered && self.sequence.is_current(ticket) {
            self.registered.remove(&ticket.chat_id);
            true
        } else {
            tracing::debug!(
                chat_id = %ticket.chat_id,
                seq = ticket.seq,
                current = self.sequence.current(&ticket.chat_id),
                "Discarding stale history result"
            );
            false
        }
    }

    /// Supersede any load for `chat_id` and abandon its shared request.
    pub fn invalidate(&mut self, chat_id: &str) {
        self.sequence.advance(chat_id);
        self.registered.remove(chat_id);
        self.inflight.forget(&chat_id.to_string());
    }

    /// A load for `chat_id` is registered and not yet applied.
    pub fn is_loading(&self, chat_id: &str) -> bool {
        self.registered.contains_key(chat_id)
    }

    pub fn any_loading(&self) -> bool {
        !self.registered.is_empty()
    }

    pub fn current_seq(&self, chat_id: &str) -> u64 {
        self.sequence.current(chat_id)
    }
}
