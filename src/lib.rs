//! Threadline - client-side streaming chat sessions.
//!
//! Keeps one active chat in sync with a chat backend: sends messages, streams
//! the assistant's thoughts and answer as server-sent events, reattaches to
//! turns already running on the server and reconciles the live text with
//! history snapshots.

pub mod adapters;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod inflight;
pub mod logging;
pub mod merge;
pub mod models;
pub mod reconciler;
pub mod session;
pub mod sse;
pub mod traits;

pub use backend::BackendClient;
pub use config::{ClientConfig, ControllerConfig};
pub use events::SessionEvent;
pub use session::{SendError, SessionController};
