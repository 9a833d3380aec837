//! Shared fixtures for the integration tests.
//!
//! ```ignore
//! mod common;
//! use common::*;
//!
//! let backend = MockBackend::new();
//! let mut controller = controller(&backend);
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use threadline::adapters::mock::MockBackend;
use threadline::events::SessionEvent;
use threadline::{ControllerConfig, SessionController};
use tokio::sync::mpsc::UnboundedReceiver;

/// Short polls so waits settle quickly; generous ceiling for slow CI.
pub fn test_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_state_wait_poll(Duration::from_millis(5))
        .with_state_wait_timeout(Duration::from_secs(3))
}

/// Controller over a clone of `backend`.
pub fn controller(backend: &MockBackend) -> SessionController {
    SessionController::new(Arc::new(backend.clone()), test_config())
}

pub fn thoughts(chat_id: &str, text: &str) -> Value {
    json!({"type": "thoughts", "chatId": chat_id, "content": text})
}

pub fn answer(chat_id: &str, text: &str) -> Value {
    json!({"type": "answer", "chatId": chat_id, "content": text})
}

pub fn complete(chat_id: &str, message_id: Option<&str>) -> Value {
    match message_id {
        Some(id) => json!({"type": "complete", "chatId": chat_id, "messageId": id}),
        None => json!({"type": "complete", "chatId": chat_id}),
    }
}

pub fn error_event(chat_id: &str, message: &str) -> Value {
    json!({"type": "error", "chatId": chat_id, "message": message})
}

pub fn chat_state(chat_id: &str, state: &str) -> Value {
    json!({"type": "chat_state", "chatId": chat_id, "state": state})
}

/// Events framed as a `text/event-stream` body.
pub fn sse_body(events: &[Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect()
}

/// Rendered content of `message_id` in `chat_id`.
pub fn content(controller: &SessionController, chat_id: &str, message_id: &str) -> Option<String> {
    controller
        .session(chat_id)
        .and_then(|s| s.message(message_id))
        .map(|m| m.content.clone())
}

/// Everything delivered to `events` so far.
pub fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
