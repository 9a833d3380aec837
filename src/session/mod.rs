//! Chat session lifecycle.
//!
//! - `state` - the per-chat turn state machine
//! - `ownership` - which stream may write into which message
//! - `task` - cancellable background work and the messages it reports
//! - `controller` - `SessionController`, which ties them together

mod controller;
mod ownership;
mod state;
mod task;

pub use controller::{SendError, SessionController};
pub use ownership::{OwnershipSlot, StreamMode, StreamOwnership};
pub use state::{transition, Trigger};
pub use task::{ActivationTicket, ControllerMessage, FetchKind, PendingFetch, StreamOutcome};
