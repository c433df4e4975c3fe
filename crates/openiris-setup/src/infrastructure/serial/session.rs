//! One open serial connection to a board.
//!
//! The session is strictly half-duplex: [`SerialSession::send_command`]
//! takes `&mut self`, so a second command cannot be issued while the first
//! is still waiting for its reply.
//!
//! # Request / response cycle
//!
//! 1. Stale input (boot log, old heartbeats) is discarded.
//! 2. The request line is written.
//! 3. Whatever bytes are waiting are appended to a [`FrameBuffer`]; when none
//!    are waiting the session sleeps for the poll interval, never past the
//!    deadline.
//! 4. As soon as the buffer yields the frame the command expects the reply
//!    is returned.  Past the deadline a `Command timeout` sentinel is
//!    returned instead; timeouts are values, not errors.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use openiris_core::protocol::{
    encode_request, CommandEnvelope, Frame, FrameBuffer, ResponseEnvelope, TransportFailure, COMMAND_TIMEOUT,
    SCAN_TIMEOUT,
};
use openiris_core::DeviceCommand;
use serde_json::{json, Map};
use tracing::{debug, info, trace, warn};

use super::{is_timeout_error, read_waiting, PortOpener, SerialLink, TransportError};
use crate::application::device::CommandTransport;
use crate::application::monitor::RawSource;

/// Timing parameters for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Per-read deadline the port is opened with.
    pub read_timeout: Duration,
    /// Reply deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Reply deadline for `scan_networks`.
    pub scan_timeout: Duration,
    /// Reply deadline for the `pause` sent right after connecting.
    pub pause_timeout: Duration,
    /// Sleep between polls when no bytes are waiting.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            command_timeout: COMMAND_TIMEOUT,
            scan_timeout: SCAN_TIMEOUT,
            pause_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// The frame shape a pending command is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Results,
    Networks,
}

pub struct SerialSession {
    port: String,
    link: Option<Box<dyn SerialLink>>,
    buffer: FrameBuffer,
    config: SessionConfig,
}

impl SerialSession {
    /// Opens `port` and returns an idle session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] if the port cannot be opened.
    pub fn open(opener: &dyn PortOpener, port: &str, config: SessionConfig) -> Result<Self, TransportError> {
        let link = opener.open(port, config.read_timeout)?;
        info!("connected to {port}");
        Ok(Self::from_link(port, link, config))
    }

    /// Like [`open`](Self::open), but retries a port that is still busy,
    /// e.g. because a discovery listener has not released it yet.
    ///
    /// # Errors
    ///
    /// Returns the last [`TransportError`] once `attempts` are exhausted.
    pub fn open_with_retry(
        opener: &dyn PortOpener,
        port: &str,
        config: SessionConfig,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, TransportError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::open(opener, port, config.clone()) {
                Ok(session) => return Ok(session),
                Err(e) if attempt < attempts => {
                    warn!("open {port} failed (attempt {attempt}/{attempts}): {e}");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wraps an already-open link.
    pub fn from_link(port: &str, link: Box<dyn SerialLink>, config: SessionConfig) -> Self {
        Self {
            port: port.to_string(),
            link: Some(link),
            buffer: FrameBuffer::new(),
            config,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Asks the board to stay in setup mode.
    ///
    /// Boards often act on the pause before their reply makes it out, so a
    /// timeout is logged rather than treated as failure.  Returns `true` when
    /// the board acknowledged.
    pub fn pause_setup(&mut self) -> bool {
        let timeout = self.config.pause_timeout;
        match self.execute(&DeviceCommand::Pause(true), Some(timeout)) {
            ResponseEnvelope::Failed(TransportFailure::Timeout) => {
                info!("no reply to pause from {}; continuing", self.port);
                false
            }
            response if response.is_failure() => {
                warn!("pause rejected by {}: {}", self.port, response.to_json());
                false
            }
            _ => {
                debug!("{} paused in setup mode", self.port);
                true
            }
        }
    }

    /// Sends a typed command.
    pub fn execute(&mut self, command: &DeviceCommand, timeout: Option<Duration>) -> ResponseEnvelope {
        self.send_command(&command.to_envelope(), timeout)
    }

    /// Sends `envelope` and waits for its reply.
    ///
    /// `timeout` overrides the default deadline (`command_timeout`, or
    /// `scan_timeout` for `scan_networks`).
    pub fn send_command(&mut self, envelope: &CommandEnvelope, timeout: Option<Duration>) -> ResponseEnvelope {
        let expect = if envelope.expects_networks() {
            Expect::Networks
        } else {
            Expect::Results
        };
        let timeout = timeout.unwrap_or(match expect {
            Expect::Networks => self.config.scan_timeout,
            Expect::Results => self.config.command_timeout,
        });

        let Some(link) = self.link.as_mut() else {
            return ResponseEnvelope::Failed(TransportFailure::NotConnected);
        };

        let request = match encode_request(envelope) {
            Ok(bytes) => bytes,
            Err(e) => return ResponseEnvelope::Failed(TransportFailure::Communication(e.to_string())),
        };

        if let Err(e) = link.clear_input() {
            debug!("could not clear input on {}: {e}", self.port);
        }
        self.buffer.clear();

        if let Err(e) = link.write_all(&request).and_then(|()| link.flush()) {
            warn!("write to {} failed: {e}", self.port);
            return ResponseEnvelope::Failed(TransportFailure::Communication(e.to_string()));
        }
        debug!("-> {}: {}", self.port, String::from_utf8_lossy(&request).trim_end());

        let deadline = Instant::now() + timeout;
        loop {
            let bytes = match read_waiting(&mut **link) {
                Ok(bytes) => bytes,
                Err(e) if is_timeout_error(&e) => Vec::new(),
                Err(e) => {
                    warn!("read from {} failed: {e}", self.port);
                    return ResponseEnvelope::Failed(TransportFailure::Communication(e.to_string()));
                }
            };

            if !bytes.is_empty() {
                trace!("<- {}: {:?}", self.port, String::from_utf8_lossy(&bytes));
                self.buffer.push(&bytes);
                if let Some(response) = take_response(&mut self.buffer, expect) {
                    return response;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("{} timed out after {timeout:?}", envelope.command);
                return ResponseEnvelope::timeout();
            }
            if bytes.is_empty() {
                thread::sleep(self.config.poll_interval.min(deadline - now));
            }
        }
    }

    /// Returns whatever raw bytes are waiting, for log monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the port fails, or if the session
    /// is closed.
    pub fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let link = self.link.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "session closed"))
        })?;
        Ok(read_waiting(&mut **link)?)
    }

    /// Releases the port.  With `resume` set the board is first told to
    /// leave setup mode.  Calling this on a closed session does nothing.
    pub fn close(&mut self, resume: bool) {
        if self.link.is_none() {
            return;
        }
        if resume {
            let timeout = self.config.pause_timeout;
            let response = self.execute(&DeviceCommand::Pause(false), Some(timeout));
            if response.is_failure() {
                debug!("resume on {} not acknowledged: {}", self.port, response.to_json());
            }
        }
        self.link = None;
        self.buffer.clear();
        info!("disconnected from {}", self.port);
    }
}

/// Pulls the reply for `expect` out of `buffer`, if it has arrived.
fn take_response(buffer: &mut FrameBuffer, expect: Expect) -> Option<ResponseEnvelope> {
    let has_results = |f: &Frame| f.contains_key("results");

    if expect == Expect::Networks {
        if let Some(frame) = buffer.take_where(|f| f.contains_key("networks")) {
            return Some(ResponseEnvelope::from_networks_frame(frame));
        }
        // A successful results frame without a networks frame means the
        // scan finished with nothing to report.
        let frame = buffer.take_where(has_results)?;
        let response = results_response(frame);
        if response.is_failure() {
            return Some(response);
        }
        let mut empty = Map::new();
        empty.insert("networks".to_string(), json!([]));
        return Some(ResponseEnvelope::from_networks_frame(empty));
    }

    buffer.take_where(has_results).map(results_response)
}

fn results_response(frame: Frame) -> ResponseEnvelope {
    ResponseEnvelope::from_results_frame(frame)
        .unwrap_or_else(|e| ResponseEnvelope::Failed(TransportFailure::Communication(e.to_string())))
}

impl CommandTransport for SerialSession {
    fn send_command(&mut self, envelope: &CommandEnvelope, timeout: Option<Duration>) -> ResponseEnvelope {
        SerialSession::send_command(self, envelope, timeout)
    }
}

impl RawSource for SerialSession {
    fn read_available(&mut self) -> std::io::Result<Vec<u8>> {
        SerialSession::read_available(self).map_err(|e| match e {
            TransportError::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::mock::{MockLinkHandle, MockScript, MockSerialLink};

    fn fast_config() -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_millis(50),
            command_timeout: Duration::from_millis(300),
            scan_timeout: Duration::from_millis(300),
            pause_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn session(script: MockScript) -> (SerialSession, MockLinkHandle) {
        let (link, handle) = MockSerialLink::new(script);
        (SerialSession::from_link("mock0", Box::new(link), fast_config()), handle)
    }

    fn results_line(inner: serde_json::Value) -> Vec<u8> {
        format!("{}\n", json!({ "results": [inner.to_string()] })).into_bytes()
    }

    #[test]
    fn test_silent_device_times_out_with_sentinel() {
        // Arrange
        let (mut session, _handle) = session(MockScript::new());
        let started = Instant::now();

        // Act
        let response = session.execute(&DeviceCommand::GetSerial, Some(Duration::from_millis(150)));

        // Assert
        let elapsed = started.elapsed();
        assert_eq!(response.to_json(), json!({ "error": "Command timeout" }));
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(400), "overshot deadline: {elapsed:?}");
    }

    #[test]
    fn test_reply_amid_log_noise_is_extracted() {
        // Arrange
        let script = MockScript::new()
            .respond_with(|_| {
                let mut bytes = b"\x1b[0;32mI (900) cmd: ok\x1b[0m\r\n".to_vec();
                bytes.extend(results_line(json!({ "result": "{\"serial\":\"S9\",\"mac\":\"M9\"}", "status": "success" })));
                Some(bytes)
            })
            .reply_delay(Duration::from_millis(20));
        let (mut session, handle) = session(script);

        // Act
        let reply = session
            .execute(&DeviceCommand::GetSerial, None)
            .into_reply()
            .expect("reply");

        // Assert
        assert_eq!(reply.field::<String>("serial").unwrap(), "S9");
        assert_eq!(handle.requests()[0].command, "get_serial");
    }

    #[test]
    fn test_stale_input_is_cleared_before_sending() {
        // Arrange: a stale reply is already waiting before the command is sent
        let (mut session, handle) = session(MockScript::new());
        handle.push(results_line(json!({ "result": "stale", "status": "success" })));

        // Act
        let response = session.execute(&DeviceCommand::GetSerial, Some(Duration::from_millis(60)));

        // Assert
        assert_eq!(response, ResponseEnvelope::timeout());
    }

    #[test]
    fn test_heartbeat_before_reply_is_skipped() {
        let script = MockScript::new().respond_with(|_| {
            let mut bytes = b"{\"heartbeat\":\"openiris_setup_mode\",\"serial\":\"X\"}\n".to_vec();
            bytes.extend(results_line(json!({ "result": "done", "status": "success" })));
            Some(bytes)
        });
        let (mut session, _handle) = session(script);

        let reply = session.execute(&DeviceCommand::ConnectWifi, None).into_reply();

        assert_eq!(reply.map(|r| r.payload), Ok(json!("done")));
    }

    #[test]
    fn test_scan_prefers_networks_frame() {
        // Arrange: an acknowledgement and the networks frame arrive together
        let script = MockScript::new().respond_with(|_| {
            let mut bytes = results_line(json!({ "result": "scanning", "status": "success" }));
            bytes.extend_from_slice(b"{\"networks\":[{\"ssid\":\"lab\",\"channel\":1,\"rssi\":-60,\"mac_address\":\"aa\",\"auth_mode\":3}]}\n");
            Some(bytes)
        });
        let (mut session, _handle) = session(script);

        // Act
        let reply = session.execute(&DeviceCommand::ScanNetworks, None).into_reply().expect("reply");

        // Assert
        assert_eq!(reply.payload["networks"][0]["ssid"], "lab");
    }

    #[test]
    fn test_scan_success_without_networks_means_empty_list() {
        let script = MockScript::new()
            .respond_with(|_| Some(results_line(json!({ "result": "no networks", "status": "success" }))));
        let (mut session, _handle) = session(script);

        let reply = session.execute(&DeviceCommand::ScanNetworks, None).into_reply().expect("reply");

        assert_eq!(reply.payload, json!({ "networks": [] }));
    }

    #[test]
    fn test_scan_failure_is_returned_as_is() {
        let script = MockScript::new()
            .respond_with(|_| Some(results_line(json!({ "result": "radio busy", "status": "error" }))));
        let (mut session, _handle) = session(script);

        let response = session.execute(&DeviceCommand::ScanNetworks, None);

        assert!(response.is_failure());
        assert!(matches!(response, ResponseEnvelope::Results(_)));
    }

    #[test]
    fn test_read_failure_becomes_communication_error() {
        let (mut session, handle) = session(MockScript::new());
        handle.fail_reads(std::io::ErrorKind::BrokenPipe);

        let response = session.execute(&DeviceCommand::GetSerial, None);

        assert!(matches!(
            response,
            ResponseEnvelope::Failed(TransportFailure::Communication(_))
        ));
    }

    #[test]
    fn test_close_sends_resume_and_is_idempotent() {
        // Arrange
        let script = MockScript::new()
            .respond_with(|_| Some(results_line(json!({ "result": "ok", "status": "success" }))));
        let (mut session, handle) = session(script);

        // Act
        session.close(true);
        session.close(true);

        // Assert
        let requests = handle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command, "pause");
        assert_eq!(requests[0].data.as_ref().map(|d| d["pause"].clone()), Some(json!(false)));
        assert!(handle.is_closed());
        assert!(!session.is_connected());
    }

    #[test]
    fn test_closed_session_reports_not_connected() {
        let (mut session, _handle) = session(MockScript::new());
        session.close(false);

        assert_eq!(
            session.execute(&DeviceCommand::GetSerial, None),
            ResponseEnvelope::Failed(TransportFailure::NotConnected)
        );
        assert!(session.read_available().is_err());
    }

    #[test]
    fn test_pause_setup_tolerates_timeout() {
        let (mut session, handle) = session(MockScript::new());

        let acknowledged = session.pause_setup();

        assert!(!acknowledged);
        assert!(session.is_connected());
        assert_eq!(handle.requests()[0].command, "pause");
    }
}
