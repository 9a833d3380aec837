//! Event framing for chunked `text/event-stream` bodies.
//!
//! A frame ends at a blank line (`\n\n` or `\r\n\r\n`). Within a frame, every
//! `data:` line contributes one line of the payload; other lines (`event:`,
//! `id:`, `: comment`) are ignored. Transport chunks split frames at arbitrary
//! byte offsets, so whatever follows the last boundary is handed back as `rest`
//! for the caller to prepend to the next read.

/// Prefix that marks a payload line.
pub const DATA_MARKER: &str = "data:";

const LF_BOUNDARY: &str = "\n\n";
const CRLF_BOUNDARY: &str = "\r\n\r\n";

/// Split `buffer` into complete event payloads and the unconsumed tail.
///
/// Frames without any `data:` line produce no payload.
pub fn drain(buffer: &str) -> (Vec<String>, String) {
    let mut events = Vec::new();
    let mut pos = 0;

    while let Some((offset, boundary_len)) = next_boundary(&buffer[pos..]) {
        let frame = &buffer[pos..pos + offset];
        if let Some(payload) = frame_payload(frame) {
            events.push(payload);
        }
        pos += offset + boundary_len;
    }

    (events, buffer[pos..].to_string())
}

/// Earliest blank-line boundary in `text`: (offset, boundary length).
fn next_boundary(text: &str) -> Option<(usize, usize)> {
    let lf = text.find(LF_BOUNDARY).map(|i| (i, LF_BOUNDARY.len()));
    let crlf = text.find(CRLF_BOUNDARY).map(|i| (i, CRLF_BOUNDARY.len()));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Join the `data:` lines of one frame.
fn frame_payload(frame: &str) -> Option<String> {
    let mut lines = frame
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix(DATA_MARKER))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .peekable();

    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

/// Incremental byte-level decoder.
///
/// Holds back incomplete UTF-8 sequences between reads so a multi-byte
/// character split across transport chunks is never mangled.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    rest: String,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return the payloads it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        self.decode_pending();
        self.drain_rest()
    }

    /// Flush at end of input. Complete frames still buffered are returned; a
    /// trailing frame without its blank line is discarded.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.rest.push_str(&tail);
            self.pending.clear();
        }
        let events = self.drain_rest();
        if !self.rest.trim().is_empty() {
            tracing::debug!(
                bytes = self.rest.len(),
                "Discarding unterminated event at end of stream"
            );
        }
        self.rest.clear();
        events
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.rest.len() + self.pending.len()
    }

    fn drain_rest(&mut self) -> Vec<String> {
        let (events, rest) = drain(&self.rest);
        self.rest = rest;
        events
    }

    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.rest.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    let prefix = std::str::from_utf8(&self.pending[..valid]).unwrap_or_default();
                    self.rest.push_str(prefix);
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.rest.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_EVENTS: &str = "data: {\"type\":\"answer\",\"content\":\"Hel\"}\n\n\
                                event: message\ndata: {\"type\":\"answer\",\"content\":\"lo\"}\n\n\
                                : keepalive\ndata: {\"type\":\"complete\"}\n\n";

    #[test]
    fn test_drain_single_event() {
        let (events, rest) = drain("data: hello\n\n");
        assert_eq!(events, vec!["hello".to_string()]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_drain_keeps_partial_tail() {
        let (events, rest) = drain("data: one\n\ndata: tw");
        assert_eq!(events, vec!["one".to_string()]);
        assert_eq!(rest, "data: tw");
    }

    #[test]
    fn test_drain_crlf_boundaries() {
        let (events, rest) = drain("data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(events, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_drain_mixed_line_endings() {
        let (events, _) = drain("data: one\r\n\r\ndata: two\n\ndata: three\r\n\r\n");
        assert_eq!(events, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_drain_multiline_data() {
        let (events, _) = drain("data: first\ndata: second\ndata:third\n\n");
        assert_eq!(events, vec!["first\nsecond\nthird".to_string()]);
    }

    #[test]
    fn test_drain_ignores_non_data_lines() {
        let (events, _) = drain("event: answer\nid: 7\n: comment\ndata: payload\n\n");
        assert_eq!(events, vec!["payload".to_string()]);

        let (events, rest) = drain(": keepalive\n\n");
        assert!(events.is_empty());
        assert_eq!(rest, "");
    }

    #[test]
    fn test_drain_preserves_inner_spacing() {
        let (events, _) = drain("data:   indented\n\n");
        assert_eq!(events, vec!["  indented".to_string()]);
    }

    #[test]
    fn test_split_at_any_offset_matches_single_call() {
        let (expected, rest) = drain(THREE_EVENTS);
        assert_eq!(expected.len(), 3);
        assert_eq!(rest, "");

        for offset in 0..=THREE_EVENTS.len() {
            let (first, rest) = drain(&THREE_EVENTS[..offset]);
            let resumed = format!("{}{}", rest, &THREE_EVENTS[offset..]);
            let (second, rest) = drain(&resumed);
            let mut all = first;
            all.extend(second);
            assert_eq!(all, expected, "split at offset {}", offset);
            assert_eq!(rest, "");
        }
    }

    #[test]
    fn test_decoder_feed_chunks() {
        let mut decoder = FrameDecoder::new();
        let bytes = THREE_EVENTS.as_bytes();
        let mut events = Vec::new();
        for chunk in bytes.chunks(7) {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.finish());
        assert_eq!(events, drain(THREE_EVENTS).0);
    }

    #[test]
    fn test_decoder_multibyte_split() {
        let text = "data: héllo wörld\n\n";
        let bytes = text.as_bytes();
        // Split inside the two-byte 'é'
        let split = text.find('é').unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let events = decoder.feed(&bytes[split..]);
        assert_eq!(events, vec!["héllo wörld".to_string()]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_decoder_invalid_bytes_replaced() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"data: a\xffb\n\n");
        assert_eq!(events, vec!["a\u{FFFD}b".to_string()]);
    }

    #[test]
    fn test_finish_drains_complete_and_discards_partial() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: done").is_empty());
        assert!(decoder.finish().is_empty());
        assert_eq!(decoder.buffered_len(), 0);

        let mut decoder = FrameDecoder::new();
        decoder.pending.extend_from_slice(b"data: last\n\n");
        assert_eq!(decoder.finish(), vec!["last".to_string()]);
    }
}
