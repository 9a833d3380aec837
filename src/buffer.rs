//! Append-only text accumulator for streamed chunks.
//!
//! Streaming responses arrive as many small fragments. Pushing each one onto a
//! `String` is fine until something needs the full text on every chunk, at
//! which point the repeated joins go quadratic. `ChunkedTextBuffer` keeps the
//! fragments as-is and joins them lazily, caching the result until the next
//! append.

use std::fmt;

use once_cell::unsync::OnceCell;

/// Fragment list with a lazily computed, cached concatenation.
#[derive(Debug, Default, Clone)]
pub struct ChunkedTextBuffer {
    fragments: Vec<String>,
    /// Sum of fragment byte lengths, maintained on append.
    len: usize,
    joined: OnceCell<String>,
}

impl ChunkedTextBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer holding `text` as its single fragment.
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut buffer = Self::new();
        buffer.reset_to(text);
        buffer
    }

    /// Append a fragment. O(1); invalidates the cached concatenation.
    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.len += text.len();
        self.fragments.push(text.to_string());
        self.joined = OnceCell::new();
    }

    /// Full text. Joined on first access after an append, then cached.
    pub fn as_str(&self) -> &str {
        self.joined.get_or_init(|| self.fragments.concat())
    }

    /// Return the full text and collapse storage to that single value, so
    /// later appends start from one fragment instead of the whole history.
    pub fn finalize(&mut self) -> String {
        let text = self.as_str().to_string();
        self.reset_to(text.clone());
        text
    }

    /// Replace the contents with `text`.
    pub fn reset_to(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.len = text.len();
        self.fragments.clear();
        self.joined = OnceCell::new();
        if !text.is_empty() {
            self.fragments.push(text.clone());
            let _ = self.joined.set(text);
        }
    }

    /// Drop all content.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.len = 0;
        self.joined = OnceCell::new();
    }

    /// Byte length of the accumulated text, without forcing a join.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of stored fragments.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

impl fmt::Display for ChunkedTextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
