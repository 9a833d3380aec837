//! HTTP implementation of [`ChatBackend`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET /v1/chats/{id}/state` -> `{"state": "static|thinking|responding"}`
//! - `GET /v1/chats/{id}/messages` -> `{"messages": [...]}` (404: no history yet)
//! - `POST /v1/chats/{id}/stream` -> `text/event-stream`

use async_trait::async_trait;

use crate::adapters::ReqwestHttpClient;
use crate::config::ClientConfig;
use crate::error::BackendError;
use crate::models::{ChatState, HistoryResponse, Message, SessionStateResponse, StreamRequest};
use crate::traits::{ByteStream, ChatBackend, Headers, HttpClient, HttpError, Response};

/// Backend client generic over the HTTP transport.
#[derive(Debug, Clone)]
pub struct BackendClient<H> {
    http: H,
    config: ClientConfig,
}

impl BackendClient<ReqwestHttpClient> {
    /// Client over reqwest with the configured request timeout.
    pub fn from_config(config: ClientConfig) -> Self {
        let http = ReqwestHttpClient::new().with_request_timeout(config.request_timeout);
        Self::new(http, config)
    }
}

impl<H: HttpClient> BackendClient<H> {
    pub fn new(http: H, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    /// The chat id is a single path segment, so it is percent-encoded.
    fn chat_url(&self, chat_id: &str, endpoint: &str) -> String {
        format!(
            "{}/v1/chats/{}/{}",
            self.config.base_url,
            urlencoding::encode(chat_id),
            endpoint
        )
    }

    fn headers(&self, accept: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert("Accept".to_string(), accept.to_string());
        if let Some(token) = &self.config.auth_token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        headers
    }

    fn status_error(response: &Response) -> BackendError {
        BackendError::Status {
            status: response.status,
            message: response.text_lossy(),
        }
    }
}

#[async_trait]
impl<H: HttpClient> ChatBackend for BackendClient<H> {
    async fn session_state(&self, chat_id: &str) -> Result<ChatState, BackendError> {
        let url = self.chat_url(chat_id, "state");
        let response = self.http.get(&url, &self.headers("application/json")).await?;

        // A chat the store has never seen has no turn running.
        if response.is_not_found() {
            return Ok(ChatState::Static);
        }
        if !response.is_success() {
            return Err(Self::status_error(&response));
        }
        let body: SessionStateResponse = response.json()?;
        Ok(body.state)
    }

    async fn history(&self, chat_id: &str) -> Result<Vec<Message>, BackendError> {
        let url = self.chat_url(chat_id, "messages");
        let response = self.http.get(&url, &self.headers("application/json")).await?;

        if response.is_not_found() {
            tracing::debug!(chat_id = %chat_id, "No history yet");
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(Self::status_error(&response));
        }
        let body: HistoryResponse = response.json()?;
        Ok(body.messages.into_iter().map(Message::from).collect())
    }

    async fn open_stream(
        &self,
        chat_id: &str,
        request: &StreamRequest,
    ) -> Result<ByteStream, BackendError> {
        let url = self.chat_url(chat_id, "stream");
        let body = serde_json::to_string(request)?;
        let mut headers = self.headers("text/event-stream");
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        tracing::debug!(
            chat_id = %chat_id,
            attach = request.is_attach(),
            correlation_id = ?request.correlation_id,
            "Opening stream"
        );

        self.http
            .post_stream(&url, &body, &headers)
            .await
            .map_err(|err| match err {
                HttpError::ServerError { status: 404, .. } => {
                    BackendError::NotFound(chat_id.to_string())
                }
                HttpError::ServerError { status, message } => {
                    BackendError::Status { status, message }
                }
                other => BackendError::Http(other),
            })
    }
}
