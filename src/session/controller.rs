//! The session controller.
//!
//! Owns the active chat session, the stream reconciler, the history loader
//! and the single stream ownership slot. Background work (state checks,
//! history loads, stream reads) runs in spawned tasks that report back over
//! an unbounded channel; [`SessionController::pump`] and the `wait_*` helpers
//! apply those reports on the controller's own task. Every report carries the
//! tag it was started with and is dropped if that tag no longer matches.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::config::ControllerConfig;
use crate::error::{BackendError, StreamError};
use crate::events::SessionEvent;
use crate::history::{HistoryLoader, HistoryResult, HistoryTicket};
use crate::inflight::InflightCache;
use crate::merge::{ensure_no_regression, merge_overlap};
use crate::models::{ChatSession, ChatState, Message, MessageRole, StreamRequest, TextField};
use crate::reconciler::StreamReconciler;
use crate::sse::StreamEvent;
use crate::traits::ChatBackend;

use super::ownership::{OwnershipSlot, StreamMode, StreamOwnership};
use super::state::{transition, Trigger};
use super::task::{
    run_history_load, run_state_check, run_stream, ActivationTicket, ControllerMessage, FetchKind,
    PendingFetch, StreamOutcome,
};

/// Why a send was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Chat {0} is not active")]
    NoSession(String),
    #[error("Chat {chat_id} is busy ({state})")]
    Busy { chat_id: String, state: &'static str },
}

/// Top-level state machine for chat sessions and their streams.
pub struct SessionController {
    backend: Arc<dyn ChatBackend>,
    config: ControllerConfig,
    reconciler: StreamReconciler,
    history: HistoryLoader,
    state_checks: InflightCache<String, Result<ChatState, BackendError>>,
    session: Option<ChatSession>,
    activation_epoch: u64,
    ownership: OwnershipSlot,
    stream_task: Option<PendingFetch>,
    history_task: Option<PendingFetch>,
    state_task: Option<(ActivationTicket, PendingFetch)>,
    /// History sequence number when the registered state check was issued.
    state_check_floor: u64,
    /// Sequence number of the last history snapshot applied.
    applied_history_seq: u64,
    /// Attach waiting for a history snapshot newer than its state check.
    pending_attach: Option<(String, ChatState)>,
    /// Fields whose next chunk goes through overlap merge.
    overlap_pending: HashSet<TextField>,
    /// Finished turn whose message still has a placeholder id.
    unconfirmed: Option<StreamOwnership>,
    subscribers: Vec<UnboundedSender<SessionEvent>>,
    tx: UnboundedSender<ControllerMessage>,
    rx: UnboundedReceiver<ControllerMessage>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ControllerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            history: HistoryLoader::new(Arc::clone(&backend)),
            backend,
            config,
            reconciler: StreamReconciler::new(),
            state_checks: InflightCache::new(),
            session: None,
            activation_epoch: 0,
            ownership: OwnershipSlot::new(),
            stream_task: None,
            history_task: None,
            state_task: None,
            state_check_floor: 0,
            applied_history_seq: 0,
            pending_attach: None,
            overlap_pending: HashSet::new(),
            unconfirmed: None,
            subscribers: Vec::new(),
            tx,
            rx,
        }
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn active_chat(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    /// The active session, if it is `chat_id`.
    pub fn session(&self, chat_id: &str) -> Option<&ChatSession> {
        self.session.as_ref().filter(|s| s.id == chat_id)
    }

    pub fn chat_state(&self, chat_id: &str) -> Option<ChatState> {
        self.session(chat_id).map(|s| s.state)
    }

    pub fn ownership(&self) -> Option<&StreamOwnership> {
        self.ownership.current()
    }

    pub fn reconciler(&self) -> &StreamReconciler {
        &self.reconciler
    }

    /// Loading history, streaming, or waiting for a state check.
    pub fn is_busy(&self) -> bool {
        self.ownership.current().is_some()
            || self.history.any_loading()
            || self.state_task.is_some()
    }

    pub fn is_chat_busy(&self, chat_id: &str) -> bool {
        self.ownership.for_chat(chat_id).is_some()
            || self.history.is_loading(chat_id)
            || self
                .state_task
                .as_ref()
                .is_some_and(|(ticket, _)| ticket.chat_id == chat_id)
    }

    /// Receive every [`SessionEvent`] from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    // ---------------------------------------------------------------------
    // User operations
    // ---------------------------------------------------------------------

    /// Make `chat_id` the active chat.
    ///
    /// Switching away tears the previous chat down: its stream and history
    /// tasks are cancelled, its reconciler state is cleared and its session is
    /// dropped. The new chat gets a fresh session, a state check (which may
    /// attach to a running turn) and a history load.
    pub fn activate_chat(&mut self, chat_id: &str) {
        if self.active_chat() == Some(chat_id) {
            return;
        }
        if let Some(previous) = self.session.take() {
            tracing::info!(from = %previous.id, to = %chat_id, "Switching chat");
            self.teardown(&previous.id);
        }

        self.activation_epoch += 1;
        self.session = Some(ChatSession::new(chat_id));
        self.reconciler.begin(chat_id);
        self.start_state_check(chat_id);
        self.start_history_load(chat_id);
    }

    /// Check again whether `chat_id` has a turn running and attach to it.
    ///
    /// Concurrent checks for the same chat share one request, and a chat that
    /// already has a stream is left alone.
    pub fn resume_chat(&mut self, chat_id: &str) -> Result<(), SendError> {
        if self.session(chat_id).is_none() {
            return Err(SendError::NoSession(chat_id.to_string()));
        }
        if self.ownership.for_chat(chat_id).is_some() {
            tracing::debug!(chat_id = %chat_id, "Already streaming, resume skipped");
            return Ok(());
        }
        self.start_state_check(chat_id);
        Ok(())
    }

    /// Send `text` in the active chat. Returns the id of the assistant
    /// placeholder the reply streams into.
    pub fn send_message(&mut self, chat_id: &str, text: &str) -> Result<String, SendError> {
        self.send_message_with_options(chat_id, text, None)
    }

    pub fn send_message_with_options(
        &mut self,
        chat_id: &str,
        text: &str,
        provider_options: Option<serde_json::Value>,
    ) -> Result<String, SendError> {
        let state = self
            .chat_state(chat_id)
            .ok_or_else(|| SendError::NoSession(chat_id.to_string()))?;
        let next = transition(state, Trigger::Send).ok_or_else(|| SendError::Busy {
            chat_id: chat_id.to_string(),
            state: state.as_str(),
        })?;

        self.release_stream();
        // A check issued before this send would report our own turn.
        self.cancel_state_check();
        self.pending_attach = None;

        let user = Message::user(text);
        let assistant = Message::assistant_placeholder();
        let message_id = assistant.id.clone();
        if let Some(session) = self.session.as_mut() {
            session.push(user);
            session.push(assistant);
        }

        let owner = StreamOwnership::fresh(chat_id, &message_id);
        let request = StreamRequest::new_turn(text)
            .with_message_id(&message_id)
            .with_correlation_id(&owner.correlation_id)
            .with_provider_options(provider_options);

        tracing::info!(
            chat_id = %chat_id,
            message_id = %message_id,
            correlation_id = %owner.correlation_id,
            "Sending message"
        );
        self.set_state(chat_id, next);
        self.start_stream(owner, request);
        Ok(message_id)
    }

    /// Stop the active chat's turn locally.
    ///
    /// The stream and history tasks are cancelled; text received so far stays
    /// on the message.
    pub fn stop(&mut self) {
        let Some(chat_id) = self.active_chat().map(str::to_string) else {
            return;
        };
        if let Some(owner) = self.release_stream() {
            if let Some(message) = self
                .session
                .as_mut()
                .and_then(|s| s.message_mut(&owner.message_id))
            {
                message.finalize();
                if message.is_placeholder {
                    self.unconfirmed = Some(owner);
                }
            }
            self.reconciler.finish_turn(&chat_id);
        }
        self.cancel_history(&chat_id);
        self.cancel_state_check();
        self.pending_attach = None;
        self.apply_trigger(&chat_id, Trigger::Cancel);
    }

    /// Drop the chat if it is active.
    pub fn close_chat(&mut self, chat_id: &str) {
        if self.active_chat() != Some(chat_id) {
            return;
        }
        self.teardown(chat_id);
        self.session = None;
        tracing::info!(chat_id = %chat_id, "Chat closed");
    }

    // ---------------------------------------------------------------------
    // Driving
    // ---------------------------------------------------------------------

    /// Apply every report already queued. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.handle_message(message);
            applied += 1;
        }
        applied
    }

    /// Wait for the next report and apply it.
    pub async fn process_next(&mut self) {
        if let Some(message) = self.rx.recv().await {
            self.handle_message(message);
        }
    }

    /// Apply reports until `condition` holds or the configured timeout
    /// elapses. Returns whether the condition was met.
    pub async fn wait_until<F>(&mut self, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = Instant::now() + self.config.state_wait_timeout;
        loop {
            self.pump();
            if condition(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = self.config.state_wait_poll.min(deadline - now);
            if let Ok(Some(message)) = tokio::time::timeout(wait, self.rx.recv()).await {
                self.handle_message(message);
            }
        }
    }

    /// Wait until `chat_id` is in `state`.
    pub async fn wait_for_state(&mut self, chat_id: &str, state: ChatState) -> bool {
        self.wait_until(|c| c.chat_state(chat_id) == Some(state)).await
    }

    /// Wait until nothing is loading or streaming.
    pub async fn wait_idle(&mut self) -> bool {
        self.wait_until(|c| !c.is_busy()).await
    }

    pub fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::StateChecked { ticket, result } => {
                self.on_state_checked(ticket, result)
            }
            ControllerMessage::HistoryLoaded { ticket, result } => {
                self.on_history_loaded(ticket, result)
            }
            ControllerMessage::StreamEvent { owner, event } => self.on_stream_event(owner, event),
            ControllerMessage::StreamFinished { owner, outcome } => {
                self.on_stream_finished(owner, outcome)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Task management
    // ---------------------------------------------------------------------

    fn teardown(&mut self, chat_id: &str) {
        if self.ownership.for_chat(chat_id).is_some() {
            self.release_stream();
        }
        self.cancel_history(chat_id);
        self.cancel_state_check();
        self.reconciler.clear(chat_id);
        self.overlap_pending.clear();
        self.unconfirmed = None;
        self.pending_attach = None;
        self.applied_history_seq = 0;
    }

    /// Cancel the running stream and clear ownership unconditionally.
    fn release_stream(&mut self) -> Option<StreamOwnership> {
        if let Some(task) = self.stream_task.take() {
            task.cancel();
        }
        self.overlap_pending.clear();
        let released = self.ownership.clear();
        if let Some(owner) = &released {
            tracing::debug!(
                chat_id = %owner.chat_id,
                message_id = %owner.message_id,
                correlation_id = %owner.correlation_id,
                "Released stream ownership"
            );
        }
        released
    }

    fn cancel_history(&mut self, chat_id: &str) {
        if let Some(task) = self.history_task.take() {
            task.cancel();
        }
        self.history.invalidate(chat_id);
    }

    fn cancel_state_check(&mut self) {
        if let Some((ticket, task)) = self.state_task.take() {
            task.cancel();
            self.state_checks.forget(&ticket.chat_id);
        }
    }

    fn start_state_check(&mut self, chat_id: &str) {
        let ticket = ActivationTicket {
            chat_id: chat_id.to_string(),
            epoch: self.activation_epoch,
        };
        self.state_check_floor = self.history.current_seq(chat_id);
        let backend = Arc::clone(&self.backend);
        let key = chat_id.to_string();
        let (check, started) = self.state_checks.get_or_start(key.clone(), move || async move {
            backend.session_state(&key).await
        });
        tracing::debug!(chat_id = %chat_id, epoch = ticket.epoch, coalesced = !started, "Checking session state");

        let tx = self.tx.clone();
        let task = PendingFetch::spawn(FetchKind::StateCheck, chat_id, {
            let ticket = ticket.clone();
            move |token| run_state_check(ticket, check, token, tx)
        });
        // A replaced check for the same chat shares the request, so only the
        // waiting task is dropped.
        self.state_task = Some((ticket, task));
    }

    fn start_history_load(&mut self, chat_id: &str) {
        let (ticket, fetch) = self.history.start(chat_id);
        let tx = self.tx.clone();
        self.history_task = Some(PendingFetch::spawn(FetchKind::History, chat_id, move |token| {
            run_history_load(ticket, fetch, token, tx)
        }));
    }

    fn start_stream(&mut self, owner: StreamOwnership, request: StreamRequest) {
        let chat_id = owner.chat_id.clone();
        self.reconciler.set_active_message(&chat_id, &owner.message_id);
        self.unconfirmed = None;
        self.overlap_pending.clear();
        if owner.mode == StreamMode::Resume {
            self.overlap_pending.insert(TextField::Thoughts);
            self.overlap_pending.insert(TextField::Content);
        }
        self.ownership.take(owner.clone());

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        self.stream_task = Some(PendingFetch::spawn(FetchKind::Stream, &chat_id, move |token| {
            run_stream(backend, owner, request, token, tx)
        }));
    }

    // ---------------------------------------------------------------------
    // Report handlers
    // ---------------------------------------------------------------------

    fn on_state_checked(
        &mut self,
        ticket: ActivationTicket,
        result: Result<ChatState, BackendError>,
    ) {
        let current = self
            .state_task
            .as_ref()
            .is_some_and(|(registered, _)| *registered == ticket);
        if !current || ticket.epoch != self.activation_epoch {
            tracing::debug!(chat_id = %ticket.chat_id, epoch = ticket.epoch, "Discarding stale state check");
            return;
        }
        self.state_task = None;
        let chat_id = ticket.chat_id;

        match result {
            Ok(state) if state.is_in_flight() => self.resume_turn(&chat_id, state),
            Ok(_) => {
                if self.ownership.for_chat(&chat_id).is_none() {
                    self.apply_trigger(&chat_id, Trigger::Resume(ChatState::Static));
                }
            }
            Err(err) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    error_code = err.error_code(),
                    error = %err,
                    "Session state check failed"
                );
            }
        }
    }

    /// A turn is running on the server. Attach now, unless the loaded
    /// history predates the check; then refresh it and attach afterwards.
    fn resume_turn(&mut self, chat_id: &str, state: ChatState) {
        if self.ownership.for_chat(chat_id).is_some() {
            tracing::debug!(chat_id = %chat_id, "Stream already attached");
            return;
        }
        let Some(session) = self.session(chat_id) else {
            return;
        };
        let reuse_stored = session.history_loaded;
        let stale_history = session.history_loaded
            && session.in_flight_assistant().is_none()
            && self.applied_history_seq <= self.state_check_floor;

        if stale_history {
            tracing::debug!(
                chat_id = %chat_id,
                applied_seq = self.applied_history_seq,
                "Refreshing history before attaching"
            );
            self.cancel_history(chat_id);
            self.pending_attach = Some((chat_id.to_string(), state));
            self.start_history_load(chat_id);
            return;
        }
        self.attach(chat_id, state, reuse_stored);
    }

    /// Attach to a turn already running on the server.
    ///
    /// With `reuse_stored`, a trailing stored assistant message is taken to
    /// be the running turn's reply: the snapshot was requested after the turn
    /// was seen, and a turn's prompt is stored before its reply.
    fn attach(&mut self, chat_id: &str, state: ChatState, reuse_stored: bool) {
        if self.ownership.for_chat(chat_id).is_some() {
            tracing::debug!(chat_id = %chat_id, "Stream already attached");
            return;
        }
        let Some(session) = self.session.as_mut().filter(|s| s.id == chat_id) else {
            return;
        };

        // Local in-flight message, else the stored reply of the running turn,
        // else a placeholder the history load will retarget.
        let existing = session
            .in_flight_assistant()
            .or_else(|| {
                session
                    .messages
                    .last()
                    .filter(|m| reuse_stored && m.role == MessageRole::Assistant)
            })
            .map(|m| m.id.clone());
        let message_id = match existing {
            Some(id) => id,
            None => {
                let placeholder = Message::assistant_placeholder();
                let id = placeholder.id.clone();
                tracing::info!(chat_id = %chat_id, message_id = %id, "Cold resume with placeholder");
                session.push(placeholder);
                id
            }
        };
        if let Some(message) = session.message_mut(&message_id) {
            match state {
                ChatState::Responding => message.begin_response(),
                _ => message.begin_thinking(),
            }
        }

        let owner = StreamOwnership::resumed(chat_id, &message_id);
        let request = StreamRequest::attach().with_correlation_id(&owner.correlation_id);
        tracing::info!(
            chat_id = %chat_id,
            message_id = %message_id,
            state = state.as_str(),
            "Attaching to running turn"
        );
        self.apply_trigger(chat_id, Trigger::Resume(state));
        self.start_stream(owner, request);
    }

    fn on_history_loaded(&mut self, ticket: HistoryTicket, result: HistoryResult) {
        if !self.history.accept(&ticket) {
            return;
        }
        self.history_task = None;
        let chat_id = ticket.chat_id;
        if self.session(&chat_id).is_none() {
            return;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    error_code = err.error_code(),
                    error = %err,
                    "History load failed"
                );
                self.emit(SessionEvent::HistoryFailed {
                    chat_id: chat_id.clone(),
                    error: err.to_string(),
                });
                self.finish_pending_attach(&chat_id, false);
                return;
            }
        };

        if let Some((old_id, new_id)) = self.retarget_candidate(&chat_id, &snapshot) {
            self.retarget(&chat_id, &old_id, &new_id);
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let merged = self
            .reconciler
            .merge_snapshot(&chat_id, &session.messages, snapshot);
        session.messages = merged;
        session.history_loaded = true;
        tracing::debug!(chat_id = %chat_id, seq = ticket.seq, count = session.messages.len(), "History merged");

        let messages = session.messages.clone();
        self.applied_history_seq = ticket.seq;
        self.emit(SessionEvent::MessagesReplaced {
            chat_id: chat_id.clone(),
            messages,
        });
        self.finish_pending_attach(&chat_id, true);
    }

    fn finish_pending_attach(&mut self, chat_id: &str, reuse_stored: bool) {
        if let Some((pending, state)) = self.pending_attach.take() {
            if pending == chat_id {
                self.attach(chat_id, state, reuse_stored);
            }
        }
    }

    /// Placeholder id the live stream writes into, and the stored id the
    /// snapshot reveals for it.
    fn retarget_candidate(&self, chat_id: &str, snapshot: &[Message]) -> Option<(String, String)> {
        let owner = self.ownership.for_chat(chat_id).or_else(|| {
            self.unconfirmed
                .as_ref()
                .filter(|turn| turn.chat_id == chat_id)
        })?;
        let session = self.session(chat_id)?;
        let live = session.message(&owner.message_id).filter(|m| m.is_placeholder)?;

        let (stored, earlier) = snapshot.split_last()?;
        if stored.role != MessageRole::Assistant || session.message(&stored.id).is_some() {
            return None;
        }

        let confirmed = match owner.mode {
            StreamMode::Resume => true,
            // A fresh turn's reply is only recognisable by the prompt
            // persisted right before it.
            StreamMode::Fresh => {
                let position = session.messages.iter().position(|m| m.id == live.id)?;
                let prompt = position.checked_sub(1).map(|i| &session.messages[i]);
                match (prompt, earlier.last()) {
                    (Some(local), Some(persisted)) => {
                        local.role == MessageRole::User
                            && persisted.role == MessageRole::User
                            && local.content == persisted.content
                    }
                    _ => false,
                }
            }
        };
        confirmed.then(|| (owner.message_id.clone(), stored.id.clone()))
    }

    fn retarget(&mut self, chat_id: &str, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        self.reconciler.retarget(chat_id, old_id, new_id);
        self.ownership.retarget(chat_id, old_id, new_id);
        if self
            .unconfirmed
            .as_ref()
            .is_some_and(|turn| turn.chat_id == chat_id && turn.message_id == old_id)
        {
            self.unconfirmed = None;
        }
        let renamed = self
            .session
            .as_mut()
            .is_some_and(|s| s.id == chat_id && s.rename_message(old_id, new_id));
        if renamed {
            self.emit(SessionEvent::MessageRetargeted {
                chat_id: chat_id.to_string(),
                old_id: old_id.to_string(),
                new_id: new_id.to_string(),
            });
        }
    }

    fn on_stream_event(&mut self, owner: StreamOwnership, event: StreamEvent) {
        let Some(current) = self.ownership.matching(&owner).cloned() else {
            tracing::debug!(
                chat_id = %owner.chat_id,
                correlation_id = %owner.correlation_id,
                event_type = event.event_type_name(),
                "Dropping event from superseded stream"
            );
            return;
        };
        if !current.accepts(event.chat_id(), event.correlation_id()) {
            tracing::debug!(
                chat_id = %current.chat_id,
                event_chat_id = %event.chat_id(),
                "Dropping chunk for another stream"
            );
            return;
        }

        match &event {
            StreamEvent::ChatState(payload) => {
                self.apply_trigger(&current.chat_id, Trigger::StatePush(payload.state));
            }
            _ => {
                if let Some((field, text)) = event.text_chunk() {
                    self.apply_chunk(&current, field, text);
                }
            }
        }
    }

    /// Merge one chunk into the owned message.
    fn apply_chunk(&mut self, owner: &StreamOwnership, field: TextField, text: &str) {
        let chat_id = owner.chat_id.as_str();
        let trigger = match field {
            TextField::Thoughts => Trigger::ThoughtsChunk,
            TextField::Content => Trigger::AnswerChunk,
        };
        self.apply_trigger(chat_id, trigger);

        let state = self.chat_state(chat_id);
        let Some(message) = self
            .session
            .as_mut()
            .and_then(|s| s.message_mut(&owner.message_id))
        else {
            tracing::warn!(chat_id = %chat_id, message_id = %owner.message_id, "Owned message missing");
            return;
        };
        match state {
            Some(ChatState::Responding) => message.begin_response(),
            Some(ChatState::Thinking) => message.begin_thinking(),
            _ => {}
        }
        if text.is_empty() {
            return;
        }

        // The longer of buffered and rendered text is the base. Rendered text
        // ahead of the stream came from a snapshot, and the next chunk may
        // repeat its tail.
        if self
            .reconciler
            .advance_to(chat_id, field, message.text(field))
        {
            self.overlap_pending.insert(field);
        }
        let base = self
            .reconciler
            .buffered_text(chat_id, field)
            .unwrap_or_default();

        let delta = if self.overlap_pending.remove(&field) {
            let merged = merge_overlap(base, text, &self.config.merge_window);
            if let Err(err) = ensure_no_regression(base, &merged) {
                self.report_regression(owner, field, &err);
                return;
            }
            let skipped = base.len() + text.len() - merged.len();
            if skipped > 0 {
                tracing::debug!(
                    chat_id = %chat_id,
                    field = field.as_str(),
                    skipped,
                    "Dropped resent overlap"
                );
            }
            merged[base.len()..].to_string()
        } else {
            text.to_string()
        };

        self.reconciler.push(chat_id, field, &delta);
        let updated = self
            .reconciler
            .buffered_text(chat_id, field)
            .unwrap_or_default()
            .to_string();
        if let Err(err) = ensure_no_regression(message.text(field), &updated) {
            self.report_regression(owner, field, &err);
            return;
        }

        message.set_text(field, updated.clone());
        self.emit(SessionEvent::TextUpdated {
            chat_id: chat_id.to_string(),
            message_id: owner.message_id.clone(),
            field,
            text: updated,
        });
    }

    fn report_regression(&self, owner: &StreamOwnership, field: TextField, err: &StreamError) {
        tracing::warn!(
            chat_id = %owner.chat_id,
            message_id = %owner.message_id,
            field = field.as_str(),
            error_code = err.error_code(),
            error = %err,
            "Rejected merge that would shrink text"
        );
    }

    fn on_stream_finished(&mut self, owner: StreamOwnership, outcome: StreamOutcome) {
        let Some(released) = self.ownership.clear_if(&owner) else {
            tracing::debug!(
                chat_id = %owner.chat_id,
                correlation_id = %owner.correlation_id,
                "Superseded stream finished"
            );
            return;
        };
        self.stream_task = None;
        self.overlap_pending.clear();
        let chat_id = released.chat_id.as_str();
        let mut message_id = released.message_id.clone();

        let trigger = match outcome {
            StreamOutcome::Completed { message_id: stored } => {
                if let Some(stored) = stored {
                    self.retarget(chat_id, &message_id, &stored);
                    message_id = stored;
                }
                tracing::info!(chat_id = %chat_id, message_id = %message_id, "Turn complete");
                Trigger::Complete
            }
            StreamOutcome::Ended => {
                tracing::debug!(chat_id = %chat_id, "Stream ended without completion signal");
                Trigger::Complete
            }
            StreamOutcome::Cancelled => Trigger::Cancel,
            StreamOutcome::Failed(err) => {
                tracing::error!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    error_code = err.error_code(),
                    error = %err,
                    "Stream failed"
                );
                let error = err.user_message();
                if let Some(message) = self
                    .session
                    .as_mut()
                    .and_then(|s| s.message_mut(&message_id))
                {
                    message.mark_failed(error.clone());
                }
                self.emit(SessionEvent::StreamFailed {
                    chat_id: chat_id.to_string(),
                    message_id: message_id.clone(),
                    error,
                });
                Trigger::Error
            }
        };

        let mut placeholder = false;
        if let Some(message) = self
            .session
            .as_mut()
            .and_then(|s| s.message_mut(&message_id))
        {
            message.finalize();
            placeholder = message.is_placeholder;
        }
        // A later history load can still reveal the stored id.
        self.unconfirmed = placeholder.then(|| StreamOwnership {
            message_id: message_id.clone(),
            ..released.clone()
        });
        self.reconciler.finish_turn(chat_id);
        self.apply_trigger(chat_id, trigger);
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    fn apply_trigger(&mut self, chat_id: &str, trigger: Trigger) {
        let Some(state) = self.chat_state(chat_id) else {
            return;
        };
        match transition(state, trigger) {
            Some(next) => self.set_state(chat_id, next),
            None => tracing::debug!(
                chat_id = %chat_id,
                state = state.as_str(),
                trigger = ?trigger,
                "Ignoring trigger"
            ),
        }
    }

    fn set_state(&mut self, chat_id: &str, state: ChatState) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == chat_id) else {
            return;
        };
        if session.state == state {
            return;
        }
        tracing::debug!(chat_id = %chat_id, from = session.state.as_str(), to = state.as_str(), "State change");
        session.state = state;
        self.emit(SessionEvent::StateChanged {
            chat_id: chat_id.to_string(),
            state,
        });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
