//! Trait seams for the transport and the backing store.
//!
//! - [`HttpClient`] - raw HTTP operations (GET, POST, streaming POST)
//! - [`ChatBackend`] - the chat-level collaborator the session controller
//!   talks to (session state, history, stream)

pub mod backend;
pub mod http;

pub use backend::ChatBackend;
pub use http::{ByteStream, Headers, HttpClient, HttpError, Response};
