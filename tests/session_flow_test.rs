//! SessionController integration tests over the in-memory MockBackend.

mod common;

use std::time::Duration;

use common::*;
use threadline::adapters::mock::MockBackend;
use threadline::error::BackendError;
use threadline::events::SessionEvent;
use threadline::models::{ChatState, Message, MessageRole, TextField};
use threadline::session::StreamMode;
use threadline::traits::HttpError;
use threadline::{SendError, SessionController};

async fn ready(backend: &MockBackend, chat_id: &str) -> SessionController {
    let mut c = controller(backend);
    c.activate_chat(chat_id);
    assert!(c.wait_idle().await, "activation of {} did not settle", chat_id);
    c
}

#[tokio::test]
async fn test_switch_away_and_back_mid_stream() {
    let backend = MockBackend::new();
    backend.set_history(
        "B",
        vec![Message::stored("b1", MessageRole::User, "other chat")],
    );
    let mut c = ready(&backend, "A").await;

    let stream = backend.push_stream("A");
    let m1 = c.send_message("A", "Say hello").unwrap();
    stream.send_event(&answer("A", "Hel"));
    stream.send_event(&answer("A", "lo"));
    assert!(c.wait_until(|c| content(c, "A", &m1).as_deref() == Some("Hello")).await);

    // Switch to B while A is still streaming.
    c.activate_chat("B");
    assert_eq!(c.active_chat(), Some("B"));
    assert!(c.ownership().is_none());
    assert!(!c.reconciler().contains("A"));
    assert!(c.wait_until(|_| stream.is_closed()).await);
    assert!(c.wait_until(|c| c.session("B").is_some_and(|s| s.history_loaded)).await);
    assert!(c.session("B").unwrap().message("b1").is_some());

    // The store finished the turn in the meantime.
    backend.set_history(
        "A",
        vec![
            Message::stored("u1", MessageRole::User, "Say hello"),
            Message::stored("a1", MessageRole::Assistant, "Hello"),
        ],
    );
    c.activate_chat("A");
    assert!(c.wait_idle().await);

    let session = c.session("A").unwrap();
    assert!(session.history_loaded);
    assert_eq!(session.state, ChatState::Static);
    assert_eq!(session.message("a1").unwrap().content, "Hello");
    assert_eq!(session.messages.len(), 2);
}

#[tokio::test]
async fn test_history_racing_fresh_send_retargets_placeholder() {
    let backend = MockBackend::new();
    let gate = backend.hold_history("A");
    let mut c = controller(&backend);
    c.activate_chat("A");

    let stream = backend.push_stream("A");
    let placeholder = c.send_message("A", "hi").unwrap();
    stream.send_event(&answer("A", "Hello"));
    assert!(c.wait_until(|c| content(c, "A", &placeholder).as_deref() == Some("Hello")).await);

    // The store caught the prompt and a partial reply.
    backend.set_history(
        "A",
        vec![
            Message::stored("u1", MessageRole::User, "hi"),
            Message::stored("srv-1", MessageRole::Assistant, "Hel"),
        ],
    );
    gate.release();
    assert!(c.wait_until(|c| c.session("A").unwrap().history_loaded).await);

    let session = c.session("A").unwrap();
    let ids: Vec<&str> = session.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "srv-1"]);
    assert_eq!(session.messages[1].content, "Hello");
    assert_eq!(c.ownership().unwrap().message_id, "srv-1");

    stream.send_event(&answer("A", ", world"));
    stream.send_event(&complete("A", None));
    assert!(c.wait_idle().await);
    assert_eq!(content(&c, "A", "srv-1").as_deref(), Some("Hello, world"));
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));
}

#[tokio::test]
async fn test_snapshot_ahead_of_stream_is_not_duplicated() {
    let backend = MockBackend::new();
    let gate = backend.hold_history("A");
    let mut c = controller(&backend);
    c.activate_chat("A");

    let stream = backend.push_stream("A");
    let placeholder = c.send_message("A", "hi").unwrap();
    stream.send_event(&answer("A", "Hello"));
    assert!(c.wait_until(|c| content(c, "A", &placeholder).as_deref() == Some("Hello")).await);

    // The store has already written more of the reply than we received.
    backend.set_history(
        "A",
        vec![
            Message::stored("u1", MessageRole::User, "hi"),
            Message::stored("srv-1", MessageRole::Assistant, "Hello, w"),
        ],
    );
    gate.release();
    assert!(c.wait_until(|c| c.session("A").unwrap().history_loaded).await);
    assert_eq!(content(&c, "A", "srv-1").as_deref(), Some("Hello, w"));

    stream.send_event(&answer("A", ", world"));
    stream.send_event(&complete("A", None));
    assert!(c.wait_idle().await);
    assert_eq!(content(&c, "A", "srv-1").as_deref(), Some("Hello, world"));
}

#[tokio::test]
async fn test_state_check_answered_after_own_turn_is_ignored() {
    let backend = MockBackend::new();
    let held = backend.hold_state("A");
    let mut c = controller(&backend);
    c.activate_chat("A");
    assert!(c.wait_until(|c| c.session("A").is_some_and(|s| s.history_loaded)).await);

    backend.script_stream("A", &[answer("A", "Hello"), complete("A", None)]);
    let reply = c.send_message("A", "hi").unwrap();
    assert!(c.wait_idle().await);

    // The server reports our own turn as running, after it has finished.
    backend.set_state("A", ChatState::Responding);
    held.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    c.pump();

    assert!(c.ownership().is_none());
    assert_eq!(backend.stream_requests("A").len(), 1);
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));
    let message = c.session("A").unwrap().message(&reply).unwrap();
    assert_eq!(message.content, "Hello");
    assert!(message.error.is_none());
}

#[tokio::test]
async fn test_history_for_unrelated_turn_does_not_retarget() {
    let backend = MockBackend::new();
    let gate = backend.hold_history("A");
    let mut c = controller(&backend);
    c.activate_chat("A");

    let stream = backend.push_stream("A");
    let placeholder = c.send_message("A", "new question").unwrap();
    stream.send_event(&answer("A", "Fresh"));
    assert!(c.wait_until(|c| content(c, "A", &placeholder).as_deref() == Some("Fresh")).await);

    // The latest stored reply belongs to an older prompt.
    backend.set_history(
        "A",
        vec![
            Message::stored("u0", MessageRole::User, "old question"),
            Message::stored("a0", MessageRole::Assistant, "Old answer"),
        ],
    );
    gate.release();
    assert!(c.wait_until(|c| c.session("A").unwrap().history_loaded).await);

    let session = c.session("A").unwrap();
    assert_eq!(session.messages.len(), 4);
    assert_eq!(session.message("a0").unwrap().content, "Old answer");
    assert_eq!(session.message(&placeholder).unwrap().content, "Fresh");
    assert_eq!(c.ownership().unwrap().message_id, placeholder);
}

#[tokio::test]
async fn test_content_length_never_decreases() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let mut events = c.subscribe();

    let chunks = ["The ", "quick ", "brown ", "fox ", "jumps ", "over ", "the ", "lazy ", "dog"];
    let mut frames: Vec<_> = chunks.iter().map(|chunk| answer("A", chunk)).collect();
    frames.push(complete("A", None));
    backend.script_stream("A", &frames);

    let message_id = c.send_message("A", "go").unwrap();
    assert!(c.wait_idle().await);
    assert_eq!(
        content(&c, "A", &message_id).as_deref(),
        Some("The quick brown fox jumps over the lazy dog")
    );

    let lengths: Vec<usize> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::TextUpdated {
                field: TextField::Content,
                text,
                ..
            } => Some(text.len()),
            _ => None,
        })
        .collect();
    assert_eq!(lengths.len(), chunks.len());
    assert!(lengths.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn test_state_transitions_are_reported() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let mut events = c.subscribe();

    backend.script_stream(
        "A",
        &[
            thoughts("A", "hmm"),
            answer("A", "Yes"),
            complete("A", None),
        ],
    );
    c.send_message("A", "?").unwrap();
    assert!(c.wait_idle().await);

    let states: Vec<ChatState> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![ChatState::Thinking, ChatState::Responding, ChatState::Static]
    );
}

#[tokio::test]
async fn test_chat_state_push_is_applied() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let stream = backend.push_stream("A");
    c.send_message("A", "?").unwrap();

    stream.send_event(&chat_state("A", "responding"));
    assert!(c.wait_for_state("A", ChatState::Responding).await);
    stream.send_event(&chat_state("A", "static"));
    assert!(c.wait_for_state("A", ChatState::Static).await);
}

#[tokio::test]
async fn test_stream_without_complete_is_treated_as_complete() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    backend.script_stream("A", &[answer("A", "Partial but fine")]);

    let message_id = c.send_message("A", "go").unwrap();
    assert!(c.wait_idle().await);

    let message = c.session("A").unwrap().message(&message_id).unwrap().clone();
    assert_eq!(message.content, "Partial but fine");
    assert!(message.error.is_none());
    assert!(!message.is_in_flight());
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));
}

#[tokio::test]
async fn test_transport_failure_keeps_partial_content() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let stream = backend.push_stream("A");
    let message_id = c.send_message("A", "go").unwrap();

    stream.send_event(&answer("A", "Half an ans"));
    stream.fail(HttpError::Io("connection reset".to_string()));
    assert!(c.wait_idle().await);

    let message = c.session("A").unwrap().message(&message_id).unwrap();
    assert_eq!(message.content, "Half an ans");
    assert_eq!(
        message.error.as_deref(),
        Some("Connection to the server was lost. The response may be incomplete.")
    );
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));
}

#[tokio::test]
async fn test_stream_open_failure_marks_message() {
    let backend = MockBackend::new();
    backend.fail_stream(
        "A",
        BackendError::Status {
            status: 500,
            message: "boom".to_string(),
        },
    );
    let mut c = ready(&backend, "A").await;
    let mut events = c.subscribe();

    let message_id = c.send_message("A", "go").unwrap();
    assert!(c.wait_idle().await);

    let message = c.session("A").unwrap().message(&message_id).unwrap();
    assert!(message.error.as_deref().is_some_and(|e| e.starts_with("Server error")));
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, SessionEvent::StreamFailed { .. })));
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let stream = backend.push_stream("A");
    let message_id = c.send_message("A", "go").unwrap();

    stream.send_raw("data: {not json}\n\n");
    stream.send_raw("data: {\"type\": \"usage\", \"chatId\": \"A\"}\n\n");
    stream.send_event(&answer("A", "still here"));
    stream.send_event(&complete("A", None));
    assert!(c.wait_idle().await);

    let message = c.session("A").unwrap().message(&message_id).unwrap();
    assert_eq!(message.content, "still here");
    assert!(message.error.is_none());
}

#[tokio::test]
async fn test_frames_split_across_reads() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let stream = backend.push_stream("A");
    let message_id = c.send_message("A", "go").unwrap();

    let body = sse_body(&[answer("A", "split "), answer("A", "frames"), complete("A", None)]);
    let (head, tail) = body.split_at(body.len() / 2 + 3);
    stream.send_raw(head);
    stream.send_raw(tail);
    assert!(c.wait_idle().await);
    assert_eq!(content(&c, "A", &message_id).as_deref(), Some("split frames"));
}

#[tokio::test]
async fn test_stop_is_idempotent_and_keeps_text() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;

    // Nothing running yet.
    c.stop();
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));

    let stream = backend.push_stream("A");
    let message_id = c.send_message("A", "go").unwrap();
    stream.send_event(&answer("A", "kept"));
    assert!(c.wait_until(|c| content(c, "A", &message_id).as_deref() == Some("kept")).await);

    c.stop();
    c.stop();
    assert!(!c.is_busy());
    assert!(c.wait_until(|_| stream.is_closed()).await);
    let message = c.session("A").unwrap().message(&message_id).unwrap();
    assert_eq!(message.content, "kept");
    assert!(!message.is_in_flight());
    assert!(message.error.is_none());
}

#[tokio::test]
async fn test_cancelled_stream_cannot_release_newer_ownership() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;

    let first = backend.push_stream("A");
    let second = backend.push_stream("A");
    c.send_message("A", "one").unwrap();
    assert!(c.wait_until(|_| backend.stream_requests("A").len() == 1).await);
    c.stop();

    let message_id = c.send_message("A", "two").unwrap();
    let owner = c.ownership().unwrap().clone();

    // The first task's cancellation report lands after the second send.
    assert!(c.wait_until(|_| first.is_closed()).await);
    c.pump();
    assert_eq!(c.ownership(), Some(&owner));

    second.send_event(&answer("A", "second reply"));
    second.send_event(&complete("A", None));
    assert!(c.wait_idle().await);
    assert_eq!(content(&c, "A", &message_id).as_deref(), Some("second reply"));
}

#[tokio::test]
async fn test_send_guards() {
    let backend = MockBackend::new();
    let mut c = controller(&backend);
    assert_eq!(
        c.send_message("A", "hi"),
        Err(SendError::NoSession("A".to_string()))
    );

    c.activate_chat("A");
    c.wait_idle().await;
    let _stream = backend.push_stream("A");
    c.send_message("A", "hi").unwrap();
    assert_eq!(
        c.send_message("A", "again"),
        Err(SendError::Busy {
            chat_id: "A".to_string(),
            state: "thinking"
        })
    );
    assert_eq!(
        c.send_message("B", "elsewhere"),
        Err(SendError::NoSession("B".to_string()))
    );
}

#[tokio::test]
async fn test_provider_options_are_forwarded() {
    let backend = MockBackend::new();
    let mut c = ready(&backend, "A").await;
    let _stream = backend.push_stream("A");
    let options = serde_json::json!({"model": "fast", "temperature": 0.2});

    c.send_message_with_options("A", "hi", Some(options.clone()))
        .unwrap();
    assert!(c.wait_until(|_| !backend.stream_requests("A").is_empty()).await);
    assert_eq!(backend.stream_requests("A")[0].provider_options, Some(options));
}

#[tokio::test]
async fn test_cold_resume_before_history() {
    let backend = MockBackend::new();
    backend.set_state("A", ChatState::Thinking);
    let gate = backend.hold_history("A");
    let stream = backend.push_stream("A");
    let mut c = controller(&backend);

    c.activate_chat("A");
    assert!(c.wait_until(|c| c.ownership().is_some()).await);
    let owner = c.ownership().unwrap().clone();
    assert_eq!(owner.mode, StreamMode::Resume);
    assert_eq!(c.chat_state("A"), Some(ChatState::Thinking));

    stream.send_event(&thoughts("A", "Considering"));
    stream.send_event(&answer("A", "Answer text"));
    assert!(c.wait_until(|c| content(c, "A", &owner.message_id).as_deref() == Some("Answer text")).await);

    backend.set_history(
        "A",
        vec![
            Message::stored("u1", MessageRole::User, "question"),
            Message::stored("a1", MessageRole::Assistant, "Answer").with_thoughts("Considering"),
        ],
    );
    gate.release();
    stream.send_event(&complete("A", None));
    assert!(c.wait_idle().await);

    let session = c.session("A").unwrap();
    let ids: Vec<&str> = session.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "a1"]);
    let message = &session.messages[1];
    assert_eq!(message.content, "Answer text");
    assert_eq!(message.thoughts.as_deref(), Some("Considering"));
    assert!(!message.is_in_flight());
}

#[tokio::test]
async fn test_resume_is_coalesced_and_skipped_when_streaming() {
    let backend = MockBackend::new();
    let mut c = controller(&backend);
    c.activate_chat("A");
    c.resume_chat("A").unwrap();
    c.resume_chat("A").unwrap();
    assert!(c.wait_idle().await);
    assert_eq!(backend.state_calls("A"), 1);

    backend.set_state("A", ChatState::Responding);
    let _stream = backend.push_stream("A");
    c.resume_chat("A").unwrap();
    assert!(c.wait_until(|c| c.ownership().is_some()).await);
    assert_eq!(backend.state_calls("A"), 2);

    assert!(c.wait_until(|_| backend.stream_requests("A").len() == 1).await);

    c.resume_chat("A").unwrap();
    c.pump();
    assert_eq!(backend.state_calls("A"), 2);
    assert_eq!(backend.stream_requests("A").len(), 1);
}

#[tokio::test]
async fn test_stale_history_after_switches_is_dropped() {
    let backend = MockBackend::new();
    let gate = backend.hold_history("A");
    backend.set_history("A", vec![Message::stored("old", MessageRole::User, "v1")]);
    let mut c = controller(&backend);

    c.activate_chat("A");
    c.activate_chat("B");
    c.activate_chat("A");
    backend.set_history("A", vec![Message::stored("new", MessageRole::User, "v2")]);
    gate.release();
    assert!(c.wait_idle().await);

    let session = c.session("A").unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].id, "new");
}

#[tokio::test]
async fn test_state_check_failure_leaves_chat_static() {
    let backend = MockBackend::new();
    backend.fail_state("A", BackendError::Http(HttpError::Timeout("slow".to_string())));
    let mut c = controller(&backend);
    c.activate_chat("A");
    assert!(c.wait_idle().await);
    assert_eq!(c.chat_state("A"), Some(ChatState::Static));
    assert!(c.ownership().is_none());
}

#[tokio::test]
async fn test_wait_for_state_times_out() {
    let backend = MockBackend::new();
    let mut c = SessionController::new(
        std::sync::Arc::new(backend.clone()),
        test_config().with_state_wait_timeout(Duration::from_millis(50)),
    );
    c.activate_chat("A");
    assert!(!c.wait_for_state("A", ChatState::Responding).await);
}
