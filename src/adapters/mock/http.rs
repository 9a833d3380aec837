//! Scripted [`HttpClient`] for backend client tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

/// What the mock answers for a route.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Buffered response.
    Success(Response),
    /// Transport failure.
    Error(HttpError),
    /// Streamed body, one item per chunk.
    Stream(Vec<Result<Bytes, HttpError>>),
}

impl MockResponse {
    /// Streamed body from text chunks.
    pub fn stream_text<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockResponse::Stream(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.into())))
                .collect(),
        )
    }
}

/// HTTP client answering from a route table keyed by `(method, url)`.
///
/// A route registered for a URL also answers any URL it is a prefix of; the
/// longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<HashMap<(String, String), MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, url: &str, response: MockResponse) {
        self.route("GET", url, response);
    }

    pub fn on_post(&self, url: &str, response: MockResponse) {
        self.route("POST", url, response);
    }

    fn route(&self, method: &str, url: &str, response: MockResponse) {
        self.routes
            .lock()
            .insert((method.to_string(), url.to_string()), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn record(&self, method: &str, url: &str, headers: &Headers, body: Option<&str>) {
        self.requests.lock().push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.map(str::to_string),
        });
    }

    fn lookup(&self, method: &str, url: &str) -> Result<MockResponse, HttpError> {
        let routes = self.routes.lock();
        routes
            .iter()
            .filter(|((m, pattern), _)| m == method && url.starts_with(pattern.as_str()))
            .max_by_key(|((_, pattern), _)| pattern.len())
            .map(|(_, response)| response.clone())
            .ok_or_else(|| HttpError::Other(format!("No mock response for {} {}", method, url)))
    }

    fn buffered(response: MockResponse) -> Result<Response, HttpError> {
        match response {
            MockResponse::Success(response) => Ok(response),
            MockResponse::Error(err) => Err(err),
            MockResponse::Stream(_) => Err(HttpError::Other(
                "Stream response on non-stream request".to_string(),
            )),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("GET", url, headers, None);
        Self::buffered(self.lookup("GET", url)?)
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("POST", url, headers, Some(body));
        Self::buffered(self.lookup("POST", url)?)
    }

    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError> {
        self.record("POST", url, headers, Some(body));
        match self.lookup("POST", url)? {
            MockResponse::Stream(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
            MockResponse::Success(response) if !response.is_success() => {
                Err(HttpError::ServerError {
                    status: response.status,
                    message: response.text_lossy(),
                })
            }
            MockResponse::Success(response) => {
                Ok(Box::pin(futures::stream::iter(vec![Ok(response.body)])))
            }
            MockResponse::Error(err) => Err(err),
        }
    }
}
