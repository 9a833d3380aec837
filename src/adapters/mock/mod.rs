//! Test doubles for the trait seams.
//!
//! - [`MockHttpClient`] - route table of canned HTTP responses
//! - [`MockBackend`] - in-memory chat backend with push-driven streams

pub mod backend;
pub mod http;

pub use backend::{CallGate, MockBackend, StreamHandle};
pub use http::{MockHttpClient, MockResponse, RecordedRequest};
