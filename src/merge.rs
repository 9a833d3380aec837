//! Suffix/prefix overlap merge for re-sent stream chunks.
//!
//! After a reconnect the server cannot know exactly how much text the client
//! already holds, so the first chunk it sends may repeat the tail of what was
//! rendered. `merge_overlap` drops the longest prefix of the new chunk that
//! duplicates the end of the previous text, looking only at a bounded window.

use crate::error::StreamError;

/// Size of the trailing window searched for an overlap.
///
/// The window is `min(max_chars, max(min_chars, ratio * len(previous)))`,
/// measured in bytes and widened to the nearest character boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeWindow {
    pub min_chars: usize,
    pub ratio: f64,
    pub max_chars: usize,
}

impl Default for MergeWindow {
    fn default() -> Self {
        Self {
            min_chars: 200,
            ratio: 0.25,
            max_chars: 4000,
        }
    }
}

impl MergeWindow {
    /// Default sizing capped at `max_chars`.
    pub fn with_max(max_chars: usize) -> Self {
        Self {
            max_chars,
            ..Self::default()
        }
    }

    /// Window size for a previous text of `len` bytes.
    pub fn size_for(&self, len: usize) -> usize {
        let scaled = (len as f64 * self.ratio) as usize;
        self.max_chars.min(self.min_chars.max(scaled))
    }

    /// Trailing slice of `previous` to compare against.
    pub fn tail<'a>(&self, previous: &'a str) -> &'a str {
        let mut start = previous.len().saturating_sub(self.size_for(previous.len()));
        while !previous.is_char_boundary(start) {
            start -= 1;
        }
        &previous[start..]
    }
}

/// Length in bytes of the longest prefix of `next` that `window` ends with.
pub fn overlap_len(window: &str, next: &str) -> usize {
    let mut boundaries: Vec<usize> = next
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(next.len()))
        .filter(|&i| i <= window.len())
        .collect();
    boundaries.reverse();

    boundaries
        .into_iter()
        .find(|&i| window.ends_with(&next[..i]))
        .unwrap_or(0)
}

/// `previous + next`, minus the part of `next` that repeats the tail of
/// `previous`.
pub fn merge_overlap(previous: &str, next: &str, window: &MergeWindow) -> String {
    if previous.is_empty() {
        return next.to_string();
    }
    if next.is_empty() {
        return previous.to_string();
    }

    let skip = overlap_len(window.tail(previous), next);
    let mut merged = String::with_capacity(previous.len() + next.len() - skip);
    merged.push_str(previous);
    merged.push_str(&next[skip..]);
    merged
}

/// Reject a proposed text that would be shorter than what is already shown.
pub fn ensure_no_regression(previous: &str, proposed: &str) -> Result<(), StreamError> {
    if proposed.len() < previous.len() {
        return Err(StreamError::MergeRegression {
            previous: previous.len(),
            proposed: proposed.len(),
        });
    }
    Ok(())
}
