//! Full stack: SessionController over BackendClient and reqwest, against a
//! wiremock server.

mod common;

use std::sync::Arc;

use common::*;
use threadline::models::{ChatState, MessageRole};
use threadline::{BackendClient, ClientConfig, SessionController};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_idle_chat(server: &MockServer, chat_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/chats/{}/state", chat_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "state": "static"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/chats/{}/messages", chat_id)))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn http_controller(server: &MockServer) -> SessionController {
    let backend = BackendClient::from_config(
        ClientConfig::new()
            .with_base_url(server.uri())
            .with_auth_token("secret"),
    );
    SessionController::new(Arc::new(backend), test_config())
}

#[tokio::test]
async fn test_send_and_stream_over_http() {
    let server = MockServer::start().await;
    mount_idle_chat(&server, "chat-1").await;
    Mock::given(method("POST"))
        .and(path("/v1/chats/chat-1/stream"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[
                thoughts("chat-1", "Greeting"),
                answer("chat-1", "Hel"),
                answer("chat-1", "lo"),
                complete("chat-1", Some("srv-42")),
            ]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut c = http_controller(&server);
    c.activate_chat("chat-1");
    assert!(c.wait_idle().await);
    assert!(c.session("chat-1").unwrap().messages.is_empty());

    let placeholder = c.send_message("chat-1", "Hi there").unwrap();
    assert!(c.wait_idle().await);

    let session = c.session("chat-1").unwrap();
    assert_eq!(session.state, ChatState::Static);
    assert!(session.message(&placeholder).is_none());
    let reply = session.message("srv-42").unwrap();
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(reply.content, "Hello");
    assert_eq!(reply.thoughts.as_deref(), Some("Greeting"));
    assert!(!reply.is_in_flight());
    assert_eq!(session.messages[0].content, "Hi there");
}

#[tokio::test]
async fn test_server_error_event_over_http() {
    let server = MockServer::start().await;
    mount_idle_chat(&server, "chat-2").await;
    Mock::given(method("POST"))
        .and(path("/v1/chats/chat-2/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[
                answer("chat-2", "Partial"),
                error_event("chat-2", "model overloaded"),
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let mut c = http_controller(&server);
    c.activate_chat("chat-2");
    assert!(c.wait_idle().await);

    let message_id = c.send_message("chat-2", "Hi").unwrap();
    assert!(c.wait_idle().await);

    let message = c.session("chat-2").unwrap().message(&message_id).unwrap();
    assert_eq!(message.content, "Partial");
    assert_eq!(message.error.as_deref(), Some("Server error: model overloaded"));
    assert_eq!(c.chat_state("chat-2"), Some(ChatState::Static));
}

#[tokio::test]
async fn test_stream_rejected_over_http() {
    let server = MockServer::start().await;
    mount_idle_chat(&server, "chat-3").await;
    Mock::given(method("POST"))
        .and(path("/v1/chats/chat-3/stream"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let mut c = http_controller(&server);
    c.activate_chat("chat-3");
    assert!(c.wait_idle().await);

    let message_id = c.send_message("chat-3", "Hi").unwrap();
    assert!(c.wait_idle().await);

    let message = c.session("chat-3").unwrap().message(&message_id).unwrap();
    assert!(message.content.is_empty());
    assert!(message.error.is_some());
    assert_eq!(c.chat_state("chat-3"), Some(ChatState::Static));
}
