//! In-memory serial links for unit and integration testing.
//!
//! Allows tests to script what a board prints (boot noise, heartbeats,
//! replies) and when, without any hardware attached.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use openiris_core::protocol::{decode_request, CommandEnvelope};

use super::{PortOpener, SerialLink, TransportError};

/// Produces the bytes a scripted board answers a request with.  `None`
/// means the board stays silent.
pub type Responder = Arc<dyn Fn(&CommandEnvelope) -> Option<Vec<u8>> + Send + Sync>;

/// What a mock board prints, relative to the moment its port is opened.
#[derive(Clone, Default)]
pub struct MockScript {
    chunks: Vec<(Duration, Vec<u8>)>,
    responder: Option<Responder>,
    reply_delay: Duration,
}

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `bytes` once, `delay` after the port is opened.
    pub fn emit_after(mut self, delay: Duration, bytes: impl AsRef<[u8]>) -> Self {
        self.chunks.push((delay, bytes.as_ref().to_vec()));
        self
    }

    /// Emits `bytes` `count` times, starting at `start` and repeating every
    /// `period`.
    pub fn emit_every(
        mut self,
        start: Duration,
        period: Duration,
        count: u32,
        bytes: impl AsRef<[u8]>,
    ) -> Self {
        for i in 0..count {
            self.chunks.push((start + period * i, bytes.as_ref().to_vec()));
        }
        self
    }

    /// Answers every complete request line written to the link.
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CommandEnvelope) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Delays every reply by `delay` after the request is written.
    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}

#[derive(Default)]
struct LinkState {
    pending: Vec<(Instant, Vec<u8>)>,
    ready: VecDeque<u8>,
    written: Vec<u8>,
    line: Vec<u8>,
    requests: Vec<CommandEnvelope>,
    read_error: Option<io::ErrorKind>,
    closed: bool,
}

impl LinkState {
    /// Moves chunks whose time has come into the readable queue.
    fn promote_due(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Instant, Vec<u8>)> = Vec::new();
        self.pending.retain(|(at, bytes)| {
            if *at <= now {
                due.push((*at, bytes.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _)| *at);
        for (_, bytes) in due {
            self.ready.extend(bytes);
        }
    }
}

/// Inspection handle for a [`MockSerialLink`], kept by the test.
#[derive(Clone)]
pub struct MockLinkHandle {
    state: Arc<Mutex<LinkState>>,
}

impl MockLinkHandle {
    /// Requests decoded from every complete line written so far.
    pub fn requests(&self) -> Vec<CommandEnvelope> {
        self.state.lock().expect("lock poisoned").requests.clone()
    }

    /// Raw bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().expect("lock poisoned").written.clone()
    }

    /// Makes bytes readable immediately.
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.ready.extend(bytes.as_ref().iter().copied());
    }

    /// Makes every subsequent read fail with `kind`, as if the board was
    /// unplugged.
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state.lock().expect("lock poisoned").read_error = Some(kind);
    }

    /// `true` once the link has been dropped.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("lock poisoned").closed
    }
}

/// A scripted in-memory serial link.
pub struct MockSerialLink {
    state: Arc<Mutex<LinkState>>,
    responder: Option<Responder>,
    reply_delay: Duration,
}

impl MockSerialLink {
    /// Creates a link that plays `script` from now on.
    pub fn new(script: MockScript) -> (Self, MockLinkHandle) {
        let opened = Instant::now();
        let state = LinkState {
            pending: script
                .chunks
                .into_iter()
                .map(|(delay, bytes)| (opened + delay, bytes))
                .collect(),
            ..LinkState::default()
        };
        let state = Arc::new(Mutex::new(state));
        let link = Self {
            state: Arc::clone(&state),
            responder: script.responder,
            reply_delay: script.reply_delay,
        };
        (link, MockLinkHandle { state })
    }

    fn check_read_error(state: &LinkState) -> io::Result<()> {
        match state.read_error {
            Some(kind) => Err(io::Error::new(kind, "mock read failure")),
            None => Ok(()),
        }
    }
}

impl Drop for MockSerialLink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}

impl Read for MockSerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().expect("lock poisoned");
        Self::check_read_error(&state)?;
        state.promote_due();
        if state.ready.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.ready.len());
        for (slot, byte) in buf.iter_mut().zip(state.ready.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.written.extend_from_slice(buf);

        for &byte in buf {
            if byte != b'\n' {
                state.line.push(byte);
                continue;
            }
            let line = std::mem::take(&mut state.line);
            let Ok(request) = decode_request(&line) else {
                continue;
            };
            let reply = self.responder.as_ref().and_then(|respond| respond(&request));
            state.requests.push(request);
            if let Some(reply) = reply {
                let at = Instant::now() + self.reply_delay;
                state.pending.push((at, reply));
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockSerialLink {
    fn bytes_to_read(&self) -> io::Result<u32> {
        let mut state = self.state.lock().expect("lock poisoned");
        Self::check_read_error(&state)?;
        state.promote_due();
        Ok(state.ready.len() as u32)
    }

    fn clear_input(&self) -> io::Result<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.promote_due();
        state.ready.clear();
        Ok(())
    }
}

// ── MockPortOpener ────────────────────────────────────────────────────────────

#[derive(Clone)]
enum PortBehavior {
    Unavailable,
    Script {
        script: MockScript,
        /// Opens that fail as "busy" before the port becomes available.
        busy_attempts: u32,
    },
}

#[derive(Default)]
struct OpenerState {
    ports: HashMap<String, PortBehavior>,
    attempts: HashMap<String, u32>,
    handles: HashMap<String, Vec<MockLinkHandle>>,
}

/// A [`PortOpener`] with per-path scripted behaviour.
///
/// Paths that were never configured behave like missing devices.
#[derive(Clone, Default)]
pub struct MockPortOpener {
    state: Arc<Mutex<OpenerState>>,
}

impl MockPortOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open of `path` yields a fresh link playing `script`.
    pub fn with_port(self, path: &str, script: MockScript) -> Self {
        self.insert(path, PortBehavior::Script { script, busy_attempts: 0 })
    }

    /// Every open of `path` fails.
    pub fn with_unavailable_port(self, path: &str) -> Self {
        self.insert(path, PortBehavior::Unavailable)
    }

    /// The first `busy_attempts` opens of `path` fail, later ones succeed.
    pub fn with_busy_port(self, path: &str, busy_attempts: u32, script: MockScript) -> Self {
        self.insert(path, PortBehavior::Script { script, busy_attempts })
    }

    /// How many times `path` has been opened, successfully or not.
    pub fn open_attempts(&self, path: &str) -> u32 {
        let state = self.state.lock().expect("lock poisoned");
        state.attempts.get(path).copied().unwrap_or(0)
    }

    /// Handles for every link successfully opened on `path`.
    pub fn handles(&self, path: &str) -> Vec<MockLinkHandle> {
        let state = self.state.lock().expect("lock poisoned");
        state.handles.get(path).cloned().unwrap_or_default()
    }

    fn insert(self, path: &str, behavior: PortBehavior) -> Self {
        self.state
            .lock()
            .expect("lock poisoned")
            .ports
            .insert(path.to_string(), behavior);
        self
    }
}

impl PortOpener for MockPortOpener {
    fn open(&self, path: &str, _read_timeout: Duration) -> Result<Box<dyn SerialLink>, TransportError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let attempt = {
            let counter = state.attempts.entry(path.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let unavailable = |kind, message: &str| TransportError::Connection {
            port: path.to_string(),
            source: serialport::Error::new(kind, message),
        };

        let behavior = state.ports.get(path).cloned();
        match behavior {
            None => Err(unavailable(serialport::ErrorKind::NoDevice, "no such device")),
            Some(PortBehavior::Unavailable) => {
                Err(unavailable(serialport::ErrorKind::NoDevice, "device unavailable"))
            }
            Some(PortBehavior::Script { busy_attempts, .. }) if attempt <= busy_attempts => Err(
                unavailable(serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied), "port busy"),
            ),
            Some(PortBehavior::Script { script, .. }) => {
                let (link, handle) = MockSerialLink::new(script);
                state.handles.entry(path.to_string()).or_default().push(handle);
                Ok(Box::new(link))
            }
        }
    }
}
