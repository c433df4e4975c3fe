//! Heartbeat listening on a single port.
//!
//! A board in setup mode prints a heartbeat line every second or so.  The
//! listener opens one port, reads lines for a bounded window, and reports the
//! first setup-mode heartbeat it sees.  The port is closed on every exit
//! path, because the link is dropped when `listen` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use openiris_core::protocol::frame::strip_ansi;
use openiris_core::protocol::{parse_heartbeat, LineBuffer};
use openiris_core::DeviceIdentity;
use tracing::{debug, trace};

use crate::infrastructure::serial::{is_timeout_error, read_waiting, PortOpener};

/// Timing for one listen window.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenSettings {
    /// Read timeout the port is opened with.
    pub connect_timeout: Duration,
    /// How long to listen for a heartbeat.
    pub window: Duration,
    /// Sleep between polls when no bytes are waiting.
    pub poll_interval: Duration,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            window: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        }
    }
}

pub struct HeartbeatListener {
    opener: Arc<dyn PortOpener>,
    settings: ListenSettings,
    cancel: Arc<AtomicBool>,
}

impl HeartbeatListener {
    pub fn new(opener: Arc<dyn PortOpener>, settings: ListenSettings) -> Self {
        Self {
            opener,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops listening early once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Listens on `port` and returns the identity it announces, if any.
    ///
    /// Ports that cannot be opened, that fail mid-read, or that stay silent
    /// for the whole window yield `None`.
    pub fn listen(&self, port: &str) -> Option<DeviceIdentity> {
        let mut link = match self.opener.open(port, self.settings.connect_timeout) {
            Ok(link) => link,
            Err(e) => {
                debug!("skipping {port}: {e}");
                return None;
            }
        };

        let deadline = Instant::now() + self.settings.window;
        let mut lines = LineBuffer::new();

        while Instant::now() < deadline {
            if self.cancel.load(Ordering::Relaxed) {
                trace!("listening on {port} cancelled");
                return None;
            }

            let bytes = match read_waiting(&mut *link) {
                Ok(bytes) => bytes,
                Err(e) if is_timeout_error(&e) => Vec::new(),
                Err(e) => {
                    debug!("read from {port} failed: {e}");
                    return None;
                }
            };

            if bytes.is_empty() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(self.settings.poll_interval.min(remaining));
                continue;
            }

            for line in lines.push(&bytes) {
                if let Some(hb) = parse_heartbeat(&strip_ansi(&line)) {
                    debug!("heartbeat from {} on {port}", hb.serial);
                    return Some(DeviceIdentity::new(hb.serial, port));
                }
            }
        }

        debug!("no heartbeat on {port} within {:?}", self.settings.window);
        None
    }
}
