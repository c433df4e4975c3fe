//! Frame extraction from the raw serial stream.
//!
//! OpenIris firmware shares one serial link between its log output and the
//! JSON protocol, so a reply never arrives on a clean boundary.  A single
//! read may contain half a log line, a heartbeat, and the beginning of a
//! command result; the next read completes the result and starts another log
//! line.
//!
//! # How extraction works (for beginners)
//!
//! 1. Bytes are appended to a [`FrameBuffer`], which decodes UTF-8, removes
//!    ANSI colour sequences and carriage returns, and drops any leading text
//!    that cannot start a frame.
//! 2. [`extract_frame`] finds the first `{` and walks forward keeping a depth
//!    counter: `{` adds one, `}` subtracts one.  Where the depth returns to
//!    zero the object is complete.
//! 3. The candidate span is parsed strictly with `serde_json`.  If parsing
//!    fails the span was log noise that happened to contain braces, and the
//!    scan continues at the next `{`.
//!
//! Braces inside JSON string literals are ignored by the depth counter (the
//! scanner tracks quotes and backslash escapes).  Because log noise can
//! contain an unpaired `"`, a candidate that never closes is re-checked
//! without string tracking; if that closes on a span that is not JSON, the
//! span is skipped as noise.
//!
//! ```text
//! I (312) cam: init ok\n{"heartbeat":"openiris_setup_mode","serial":"A1"}\n{"results":[...]}
//! └──── noise ────────┘ └─────────────── frame 1 ───────────────────┘  └─ frame 2 ─┘
//! ```

use serde_json::{Map, Value};
use tracing::trace;

/// One complete JSON object pulled out of the stream.
///
/// Frames always start with `{`, so they are always JSON objects.
pub type Frame = Map<String, Value>;

/// Upper bound on buffered text.  Older text is discarded past this point.
pub const MAX_BUFFERED_TEXT: usize = 64 * 1024;

// ── Extraction ────────────────────────────────────────────────────────────────

/// Extracts the first complete JSON object from `text`.
///
/// Returns the frame and the offset just past its closing brace, so the
/// caller can continue on `&text[consumed..]`.  Returns `None` when no
/// complete frame is available yet; the caller keeps accumulating.
///
/// # Examples
///
/// ```rust
/// use openiris_core::protocol::frame::extract_frame;
///
/// let text = "boot log\n{\"a\":1}{\"b\":2}";
/// let (first, consumed) = extract_frame(text).unwrap();
/// assert_eq!(first["a"], 1);
/// let (second, _) = extract_frame(&text[consumed..]).unwrap();
/// assert_eq!(second["b"], 2);
/// ```
pub fn extract_frame(text: &str) -> Option<(Frame, usize)> {
    extract_frame_where(text, |_| true)
}

/// Extracts the first complete JSON object in `text` accepted by `accept`.
///
/// Frames rejected by `accept` (e.g. heartbeats while waiting for a command
/// result) are skipped.  The returned offset points just past the accepted
/// frame.
pub fn extract_frame_where<F>(text: &str, accept: F) -> Option<(Frame, usize)>
where
    F: Fn(&Frame) -> bool,
{
    let mut cursor = 0;

    while let Some(relative) = text[cursor..].find('{') {
        let start = cursor + relative;

        let end = match closing_brace(text, start, true) {
            Some(end) => end,
            None => match closing_brace(text, start, false) {
                // An unpaired quote in log noise swallowed the rest of the
                // text; the raw span is not JSON, skip it.
                Some(raw_end) if serde_json::from_str::<Value>(&text[start..raw_end]).is_err() => {
                    cursor = raw_end;
                    continue;
                }
                _ => match next_line_start_brace(text, start + 1) {
                    Some(next) => {
                        cursor = next;
                        continue;
                    }
                    None => return None,
                },
            },
        };

        let candidate = &text[start..end];
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(frame)) => {
                if accept(&frame) {
                    return Some((frame, end));
                }
                trace!("skipping frame without expected keys: {candidate}");
            }
            Ok(_) => {}
            Err(e) => trace!("discarding malformed frame candidate ({e}): {candidate}"),
        }
        cursor = end;
    }

    None
}

/// Returns the offset just past the `}` matching the `{` at `start`.
///
/// With `track_strings` set, braces inside string literals are ignored.
fn closing_brace(text: &str, start: usize, track_strings: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if track_strings => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Finds the next `{` at column 0 at or after `from`.
fn next_line_start_brace(text: &str, from: usize) -> Option<usize> {
    text.get(from..)?.find("\n{").map(|p| from + p + 1)
}

// ── Text cleanup ──────────────────────────────────────────────────────────────

/// Removes ANSI SGR sequences (`ESC [ 0-9;* m`) and carriage returns.
///
/// A sequence cut off at the end of `text` is removed as well; use
/// [`FrameBuffer`] when input arrives in chunks.
pub fn strip_ansi(text: &str) -> String {
    let (clean, _) = strip_control(text);
    clean
}

/// Strips SGR sequences and `\r`, returning the clean text and any
/// unterminated escape sequence found at the very end.
fn strip_control(text: &str) -> (String, String) {
    let mut clean = String::with_capacity(text.len());
    let mut chars = text.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\r' => {}
            '\x1b' => {
                let rest = &text[idx + 1..];
                match sgr_length(rest) {
                    SgrScan::Complete(len) => {
                        // Skip `[`, parameters and the final `m`.
                        for _ in 0..len {
                            chars.next();
                        }
                    }
                    SgrScan::Truncated => return (clean, text[idx..].to_string()),
                    SgrScan::NotSgr => clean.push(c),
                }
            }
            _ => clean.push(c),
        }
    }
    (clean, String::new())
}

enum SgrScan {
    Complete(usize),
    Truncated,
    NotSgr,
}

/// Measures an SGR sequence following an `ESC` character.
fn sgr_length(rest: &str) -> SgrScan {
    let bytes = rest.as_bytes();
    match bytes.first() {
        None => return SgrScan::Truncated,
        Some(b'[') => {}
        Some(_) => return SgrScan::NotSgr,
    }
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match b {
            b'0'..=b'9' | b';' => {}
            b'm' => return SgrScan::Complete(i + 1),
            _ => return SgrScan::NotSgr,
        }
    }
    SgrScan::Truncated
}

/// Decodes as much of `pending` as forms complete UTF-8.
///
/// A multi-byte sequence split at the end is kept for the next call; invalid
/// bytes elsewhere are replaced with U+FFFD.
fn take_decodable(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_owned();
            pending.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}

// ── FrameBuffer ───────────────────────────────────────────────────────────────

/// Accumulates raw serial bytes and hands out complete frames.
///
/// # Examples
///
/// ```rust
/// use openiris_core::protocol::frame::FrameBuffer;
///
/// let mut buf = FrameBuffer::new();
/// buf.push(b"\x1b[0;32mI (10) main: ready\x1b[0m\r\n{\"results\":");
/// assert!(buf.next_frame().is_none());
/// buf.push(b"[\"ok\"]}\r\n");
/// let frame = buf.next_frame().unwrap();
/// assert!(frame.contains_key("results"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct FrameBuffer {
    text: String,
    pending_utf8: Vec<u8>,
    pending_escape: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes read from the serial port.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending_utf8.extend_from_slice(bytes);
        let decoded = take_decodable(&mut self.pending_utf8);

        let mut input = std::mem::take(&mut self.pending_escape);
        input.push_str(&decoded);

        let (clean, tail) = strip_control(&input);
        self.text.push_str(&clean);
        self.pending_escape = tail;

        self.discard_leading_noise();
        self.enforce_limit();
    }

    /// The cleaned text currently buffered.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Removes and returns the first complete frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.take_where(|_| true)
    }

    /// Removes and returns the first frame accepted by `accept`.
    ///
    /// Text before the returned frame (noise and rejected frames) is
    /// discarded with it.
    pub fn take_where<F>(&mut self, accept: F) -> Option<Frame>
    where
        F: Fn(&Frame) -> bool,
    {
        let (frame, consumed) = extract_frame_where(&self.text, accept)?;
        self.consume(consumed);
        Some(frame)
    }

    /// Discards everything buffered, including partial sequences.
    pub fn clear(&mut self) {
        self.text.clear();
        self.pending_utf8.clear();
        self.pending_escape.clear();
    }

    fn consume(&mut self, n: usize) {
        self.text.drain(..n);
        self.discard_leading_noise();
    }

    fn discard_leading_noise(&mut self) {
        match self.text.find('{') {
            Some(0) => {}
            Some(p) => {
                self.text.drain(..p);
            }
            None => self.text.clear(),
        }
    }

    fn enforce_limit(&mut self) {
        if self.text.len() <= MAX_BUFFERED_TEXT {
            return;
        }
        let mut cut = self.text.len() - MAX_BUFFERED_TEXT;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        match self.text[cut..].find('{') {
            Some(p) => {
                self.text.drain(..cut + p);
            }
            None => self.text.clear(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
