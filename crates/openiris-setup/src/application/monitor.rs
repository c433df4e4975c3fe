//! Log monitoring use case.
//!
//! After setup the board keeps printing its runtime log on the same serial
//! link.  The monitor splits that output into lines and classifies each one:
//! plain log text, a setup-mode heartbeat (suppressed), or some other JSON
//! frame worth surfacing.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use openiris_core::protocol::frame::strip_ansi;
use openiris_core::protocol::{Frame, HeartbeatFrame, LineBuffer};
use serde_json::Value;
use tracing::{debug, trace};

/// A source of raw bytes, read without blocking for long.
pub trait RawSource {
    /// Returns whatever bytes are waiting; empty when there are none.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

/// One classified line of device output.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorLine {
    Text(String),
    Heartbeat(HeartbeatFrame),
    Frame(Frame),
}

/// Classifies a single line.  Returns `None` for blank lines.
pub fn classify_line(line: &str) -> Option<MonitorLine> {
    let clean = strip_ansi(line);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(frame)) = serde_json::from_str::<Value>(trimmed) {
            return Some(match HeartbeatFrame::from_frame(&frame) {
                Some(hb) => MonitorLine::Heartbeat(hb),
                None => MonitorLine::Frame(frame),
            });
        }
    }
    Some(MonitorLine::Text(trimmed.to_string()))
}

/// Splits a byte stream into classified lines.
#[derive(Debug)]
pub struct LogMonitor {
    lines: LineBuffer,
    poll_interval: Duration,
}

impl LogMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            lines: LineBuffer::new(),
            poll_interval,
        }
    }

    /// Appends `bytes` and returns every line they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<MonitorLine> {
        self.lines.push(bytes).iter().filter_map(|text| classify_line(text)).collect()
    }

    /// Reads from `source` until `running` is cleared, handing every
    /// non-heartbeat line to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error reported by `source`.
    pub fn run<S, F>(&mut self, source: &mut S, running: &AtomicBool, mut sink: F) -> io::Result<()>
    where
        S: RawSource + ?Sized,
        F: FnMut(MonitorLine),
    {
        while running.load(Ordering::Relaxed) {
            let bytes = source.read_available()?;
            if bytes.is_empty() {
                std::thread::sleep(self.poll_interval);
                continue;
            }
            trace!("monitor read {} bytes", bytes.len());
            for line in self.feed(&bytes) {
                match line {
                    MonitorLine::Heartbeat(hb) => debug!("heartbeat from {}", hb.serial),
                    other => sink(other),
                }
            }
        }
        Ok(())
    }
}
