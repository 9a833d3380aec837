//! Server-sent event handling for chat streams.
//!
//! - `frame` - blank-line framing over a chunked byte stream (`drain`,
//!   `FrameDecoder`)
//! - `events` - typed `StreamEvent` decoding of frame payloads

mod events;
mod frame;

pub use events::{
    parse_stream_event, ChatStatePayload, CompletePayload, ErrorPayload, StreamEvent, TextChunk,
};
pub use frame::{drain, FrameDecoder, DATA_MARKER};
