//! Scriptable in-memory [`ChatBackend`].
//!
//! Session state and history are set per chat. Streams are driven from the
//! test: register a [`StreamHandle`] before the controller opens the stream,
//! then push events through it one at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::BackendError;
use crate::models::{ChatState, Message, StreamRequest};
use crate::traits::{ByteStream, ChatBackend, HttpError};

/// Test-side end of a scripted stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    tx: mpsc::UnboundedSender<Result<Bytes, HttpError>>,
}

impl StreamHandle {
    /// Send one event as a complete `data:` frame.
    pub fn send_event(&self, event: &serde_json::Value) -> bool {
        self.send_raw(&format!("data: {}\n\n", event))
    }

    /// Send raw bytes, which may hold partial or several frames.
    pub fn send_raw(&self, text: &str) -> bool {
        self.tx.send(Ok(Bytes::from(text.to_string()))).is_ok()
    }

    /// Fail the stream with a transport error.
    pub fn fail(&self, error: HttpError) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// The reader dropped its end, e.g. because the stream was cancelled.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Held responses for one chat; see [`MockBackend::hold_history`] and
/// [`MockBackend::hold_state`].
#[derive(Debug, Clone)]
pub struct CallGate {
    tx: Arc<watch::Sender<bool>>,
}

impl CallGate {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Let every waiting and future call for the chat proceed.
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

async fn pass(gate: Option<watch::Receiver<bool>>) {
    if let Some(mut gate) = gate {
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, ChatState>,
    state_errors: HashMap<String, BackendError>,
    state_gates: HashMap<String, watch::Receiver<bool>>,
    histories: HashMap<String, Vec<Message>>,
    history_errors: HashMap<String, BackendError>,
    history_gates: HashMap<String, watch::Receiver<bool>>,
    streams: HashMap<String, VecDeque<mpsc::UnboundedReceiver<Result<Bytes, HttpError>>>>,
    stream_errors: HashMap<String, BackendError>,
    state_calls: HashMap<String, usize>,
    history_calls: HashMap<String, usize>,
    stream_requests: Vec<(String, StreamRequest)>,
}

/// In-memory backend for controller tests.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, chat_id: &str, state: ChatState) {
        self.inner.lock().states.insert(chat_id.to_string(), state);
    }

    pub fn fail_state(&self, chat_id: &str, error: BackendError) {
        self.inner
            .lock()
            .state_errors
            .insert(chat_id.to_string(), error);
    }

    /// Messages returned by `history`. Read when the call resolves, so a test
    /// may update them while a held call is waiting.
    pub fn set_history(&self, chat_id: &str, messages: Vec<Message>) {
        self.inner
            .lock()
            .histories
            .insert(chat_id.to_string(), messages);
    }

    pub fn fail_history(&self, chat_id: &str, error: BackendError) {
        self.inner
            .lock()
            .history_errors
            .insert(chat_id.to_string(), error);
    }

    /// Make `history` calls for `chat_id` wait until the gate is released.
    pub fn hold_history(&self, chat_id: &str) -> CallGate {
        let (gate, rx) = CallGate::new();
        self.inner
            .lock()
            .history_gates
            .insert(chat_id.to_string(), rx);
        gate
    }

    /// Make `session_state` calls for `chat_id` wait until the gate is
    /// released. The state is read after the gate opens.
    pub fn hold_state(&self, chat_id: &str) -> CallGate {
        let (gate, rx) = CallGate::new();
        self.inner
            .lock()
            .state_gates
            .insert(chat_id.to_string(), rx);
        gate
    }

    /// Register the next stream opened for `chat_id`.
    pub fn push_stream(&self, chat_id: &str) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .streams
            .entry(chat_id.to_string())
            .or_default()
            .push_back(rx);
        StreamHandle { tx }
    }

    /// Register a stream that yields `frames` and then ends.
    pub fn script_stream(&self, chat_id: &str, frames: &[serde_json::Value]) {
        let handle = self.push_stream(chat_id);
        for frame in frames {
            handle.send_event(frame);
        }
    }

    pub fn fail_stream(&self, chat_id: &str, error: BackendError) {
        self.inner
            .lock()
            .stream_errors
            .insert(chat_id.to_string(), error);
    }

    pub fn state_calls(&self, chat_id: &str) -> usize {
        self.inner
            .lock()
            .state_calls
            .get(chat_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn history_calls(&self, chat_id: &str) -> usize {
        self.inner
            .lock()
            .history_calls
            .get(chat_id)
            .copied()
            .unwrap_or(0)
    }

    /// Stream requests for `chat_id` in the order they were made.
    pub fn stream_requests(&self, chat_id: &str) -> Vec<StreamRequest> {
        self.inner
            .lock()
            .stream_requests
            .iter()
            .filter(|(id, _)| id == chat_id)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn session_state(&self, chat_id: &str) -> Result<ChatState, BackendError> {
        let gate = {
            let mut inner = self.inner.lock();
            *inner.state_calls.entry(chat_id.to_string()).or_insert(0) += 1;
            inner.state_gates.get(chat_id).cloned()
        };
        pass(gate).await;

        let inner = self.inner.lock();
        if let Some(error) = inner.state_errors.get(chat_id) {
            return Err(error.clone());
        }
        Ok(inner.states.get(chat_id).copied().unwrap_or_default())
    }

    async fn history(&self, chat_id: &str) -> Result<Vec<Message>, BackendError> {
        let gate = {
            let mut inner = self.inner.lock();
            *inner.history_calls.entry(chat_id.to_string()).or_insert(0) += 1;
            inner.history_gates.get(chat_id).cloned()
        };

        pass(gate).await;

        let inner = self.inner.lock();
        if let Some(error) = inner.history_errors.get(chat_id) {
            return Err(error.clone());
        }
        Ok(inner.histories.get(chat_id).cloned().unwrap_or_default())
    }

    async fn open_stream(
        &self,
        chat_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream, BackendError> {
        let mut inner = self.inner.lock();
        inner
            .stream_requests
            .push((chat_id.to_string(), request.clone()));
        if let Some(error) = inner.stream_errors.remove(chat_id) {
            return Err(error);
        }
        match inner.streams.get_mut(chat_id).and_then(VecDeque::pop_front) {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(BackendError::Status {
                status: 409,
                message: format!("no stream scripted for chat {}", chat_id),
            }),
        }
    }
}
