//! Error types for the stream reconciliation engine.
//!
//! | Category | Example | Surfaces to user |
//! |----------|---------|------------------|
//! | Cancellation | chat switch, stop | No |
//! | Transport | connection reset mid-stream | Yes (inline) |
//! | Protocol | malformed event payload | No, logged |
//! | Server | `error` event, 5xx | Yes (inline) |
//! | Stale | superseded history fetch | No |
//! | Anomaly | merge would shrink text | No, logged |

mod backend;
mod category;
mod stream;

pub use backend::BackendError;
pub use category::ErrorCategory;
pub use stream::{StreamError, StreamParseError};
