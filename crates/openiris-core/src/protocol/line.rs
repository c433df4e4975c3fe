//! Newline splitting for the raw serial stream.
//!
//! Discovery and log monitoring read the link line by line.  A port that
//! never sends a newline (wrong baud rate, a non-OpenIris device streaming
//! binary) must not grow the pending line without bound, so a [`LineBuffer`]
//! keeps only the most recent [`MAX_LINE_BYTES`] of an unterminated line.

use tracing::trace;

/// Upper bound on the bytes held for a line that has not ended yet.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// Accumulates raw bytes and hands out complete lines.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line they complete, without the
    /// trailing newline.  Invalid UTF-8 is replaced, not rejected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw[..pos]).into_owned());
        }
        if self.partial.len() > MAX_LINE_BYTES {
            let excess = self.partial.len() - MAX_LINE_BYTES;
            trace!("dropping {excess} bytes of an unterminated line");
            self.partial.drain(..excess);
        }
        lines
    }

    /// Bytes of the line still waiting for its newline.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
