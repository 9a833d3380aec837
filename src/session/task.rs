//! Cancellable background work spawned by the session controller.
//!
//! Each task reports back over the controller's channel and never touches
//! controller state directly. Results carry the tag they were started with so
//! the controller can drop the ones that no longer apply.

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, StreamError, StreamParseError};
use crate::history::{HistoryResult, HistoryTicket};
use crate::inflight::SharedFetch;
use crate::models::{ChatState, StreamRequest};
use crate::sse::{parse_stream_event, FrameDecoder, StreamEvent};
use crate::traits::{ChatBackend, HttpError};

use super::ownership::StreamOwnership;

/// Tag for a session-state check, bumped on every activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationTicket {
    pub chat_id: String,
    pub epoch: u64,
}

/// How a stream task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// `complete` event, optionally carrying the persisted message id.
    Completed { message_id: Option<String> },
    /// The body ended without a terminal event.
    Ended,
    Failed(StreamError),
    Cancelled,
}

/// Results delivered to the controller.
#[derive(Debug, Clone)]
pub enum ControllerMessage {
    StateChecked {
        ticket: ActivationTicket,
        result: Result<ChatState, BackendError>,
    },
    HistoryLoaded {
        ticket: HistoryTicket,
        result: HistoryResult,
    },
    StreamEvent {
        owner: StreamOwnership,
        event: StreamEvent,
    },
    StreamFinished {
        owner: StreamOwnership,
        outcome: StreamOutcome,
    },
}

/// Kind of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Stream,
    History,
    StateCheck,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Stream => "stream",
            FetchKind::History => "history",
            FetchKind::StateCheck => "state_check",
        }
    }
}

/// Handle to a spawned task with its cancellation token.
///
/// Cancelling is idempotent and safe after the task has finished. Dropping
/// the handle cancels the task.
#[derive(Debug)]
pub struct PendingFetch {
    kind: FetchKind,
    chat_id: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PendingFetch {
    /// Spawn `task` with a fresh token.
    pub fn spawn<F, Fut>(kind: FetchKind, chat_id: &str, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        Self {
            kind,
            chat_id: chat_id.to_string(),
            token,
            handle,
        }
    }

    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::debug!(
            chat_id = %self.chat_id,
            kind = self.kind.as_str(),
            finished = self.handle.is_finished(),
            "Cancelling task"
        );
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn kind(&self) -> FetchKind {
        self.kind
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Await a shared state check and report it, unless cancelled first.
pub(crate) async fn run_state_check(
    ticket: ActivationTicket,
    check: SharedFetch<Result<ChatState, BackendError>>,
    token: CancellationToken,
    tx: UnboundedSender<ControllerMessage>,
) {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!(chat_id = %ticket.chat_id, epoch = ticket.epoch, "State check cancelled");
        }
        result = check => {
            let _ = tx.send(ControllerMessage::StateChecked { ticket, result });
        }
    }
}

/// Await a history load and report it, unless cancelled first.
pub(crate) async fn run_history_load(
    ticket: HistoryTicket,
    fetch: SharedFetch<HistoryResult>,
    token: CancellationToken,
    tx: UnboundedSender<ControllerMessage>,
) {
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!(chat_id = %ticket.chat_id, seq = ticket.seq, "History load cancelled");
        }
        result = fetch => {
            let _ = tx.send(ControllerMessage::HistoryLoaded { ticket, result });
        }
    }
}

/// Open the stream and forward its events until a terminal event, end of
/// body, failure or cancellation. Always reports exactly one
/// `StreamFinished`.
pub(crate) async fn run_stream(
    backend: Arc<dyn ChatBackend>,
    owner: StreamOwnership,
    request: StreamRequest,
    token: CancellationToken,
    tx: UnboundedSender<ControllerMessage>,
) {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => StreamOutcome::Cancelled,
        outcome = read_stream(backend.as_ref(), &owner, &request, &tx) => outcome,
    };

    tracing::debug!(
        chat_id = %owner.chat_id,
        correlation_id = %owner.correlation_id,
        outcome = ?outcome,
        "Stream task finished"
    );
    let _ = tx.send(ControllerMessage::StreamFinished { owner, outcome });
}

async fn read_stream(
    backend: &dyn ChatBackend,
    owner: &StreamOwnership,
    request: &StreamRequest,
    tx: &UnboundedSender<ControllerMessage>,
) -> StreamOutcome {
    let mut body = match backend.open_stream(&owner.chat_id, request).await {
        Ok(body) => body,
        Err(err) => return StreamOutcome::Failed(err.into()),
    };
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(HttpError::Cancelled) => return StreamOutcome::Cancelled,
            Err(err) => return StreamOutcome::Failed(StreamError::Transport(err.to_string())),
        };
        for payload in decoder.feed(&bytes) {
            if let Some(outcome) = dispatch(&payload, owner, tx) {
                return outcome;
            }
        }
    }

    for payload in decoder.finish() {
        if let Some(outcome) = dispatch(&payload, owner, tx) {
            return outcome;
        }
    }
    StreamOutcome::Ended
}

/// Handle one payload. Returns the outcome if it ends the stream.
fn dispatch(
    payload: &str,
    owner: &StreamOwnership,
    tx: &UnboundedSender<ControllerMessage>,
) -> Option<StreamOutcome> {
    let event = match parse_stream_event(payload) {
        Ok(event) => event,
        Err(StreamParseError::UnknownEventType(event_type)) => {
            tracing::debug!(chat_id = %owner.chat_id, event_type = %event_type, "Skipping unknown event type");
            return None;
        }
        Err(err) => {
            let error = StreamError::from(err);
            tracing::warn!(
                chat_id = %owner.chat_id,
                error_code = error.error_code(),
                error = %error,
                "Skipping malformed stream event"
            );
            return None;
        }
    };

    // Terminal events for another chat or stream must not end this one.
    if !owner.accepts(event.chat_id(), event.correlation_id()) {
        tracing::debug!(
            chat_id = %owner.chat_id,
            event_chat_id = %event.chat_id(),
            event_type = event.event_type_name(),
            "Ignoring event for another stream"
        );
        return None;
    }

    match event {
        StreamEvent::Complete(payload) => Some(StreamOutcome::Completed {
            message_id: payload.message_id,
        }),
        StreamEvent::Error(payload) => Some(StreamOutcome::Failed(StreamError::Backend {
            message: payload.message,
        })),
        event => {
            let message = ControllerMessage::StreamEvent {
                owner: owner.clone(),
                event,
            };
            // The controller is gone; nobody is left to apply anything.
            tx.send(message).err().map(|_| StreamOutcome::Cancelled)
        }
    }
}
