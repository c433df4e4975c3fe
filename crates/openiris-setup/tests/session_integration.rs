//! Integration tests for `SerialSession` opened through a `PortOpener`.
//!
//! These cover the connection lifecycle as the CLI drives it: open (with
//! retry while discovery still holds the port), pause, one command, close.

use std::time::{Duration, Instant};

use openiris_core::protocol::{ResponseEnvelope, TransportFailure};
use openiris_core::DeviceCommand;
use openiris_setup::infrastructure::serial::mock::{MockPortOpener, MockScript};
use openiris_setup::infrastructure::serial::session::{SerialSession, SessionConfig};
use openiris_setup::infrastructure::serial::TransportError;
use serde_json::json;

fn fast_config() -> SessionConfig {
    SessionConfig {
        read_timeout: Duration::from_millis(20),
        command_timeout: Duration::from_millis(300),
        scan_timeout: Duration::from_millis(500),
        pause_timeout: Duration::from_millis(150),
        poll_interval: Duration::from_millis(5),
    }
}

/// A board that acknowledges every command with `{"result":"ok"}`.
fn acknowledging_board() -> MockScript {
    MockScript::new().respond_with(|request| {
        let inner = json!({ "result": format!("{} ok", request.command), "status": "success" });
        Some(format!("{}\n", json!({ "results": [inner.to_string()] })).into_bytes())
    })
}

#[test]
fn test_open_pause_command_close_lifecycle() {
    // Arrange
    let opener = MockPortOpener::new().with_port("/dev/ttyUSB0", acknowledging_board());
    let mut session = SerialSession::open(&opener, "/dev/ttyUSB0", fast_config()).expect("open");

    // Act
    let paused = session.pause_setup();
    let reply = session
        .execute(&DeviceCommand::GetWhoAmI, None)
        .into_reply()
        .expect("reply");
    session.close(true);

    // Assert
    assert!(paused);
    assert_eq!(reply.message(), Some("get_who_am_i ok"));
    let handle = &opener.handles("/dev/ttyUSB0")[0];
    let commands: Vec<String> = handle.requests().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["pause", "get_who_am_i", "pause"]);
    assert!(handle.is_closed());
}

#[test]
fn test_written_request_is_one_compact_line() {
    let opener = MockPortOpener::new().with_port("COM3", acknowledging_board());
    let mut session = SerialSession::open(&opener, "COM3", fast_config()).expect("open");

    session.execute(&DeviceCommand::SetLedDutyCycle(40), None);

    let written = opener.handles("COM3")[0].written();
    assert_eq!(
        String::from_utf8(written).expect("utf8"),
        "{\"commands\":[{\"command\":\"set_led_duty_cycle\",\"data\":{\"dutyCycle\":40}}]}\n"
    );
}

#[test]
fn test_open_with_retry_waits_for_busy_port() {
    // Arrange: a listener still holds the port for the first two attempts
    let opener = MockPortOpener::new().with_busy_port("COM4", 2, acknowledging_board());

    // Act
    let session = SerialSession::open_with_retry(&opener, "COM4", fast_config(), 3, Duration::from_millis(10));

    // Assert
    assert!(session.is_ok());
    assert_eq!(opener.open_attempts("COM4"), 3);
}

#[test]
fn test_open_with_retry_gives_up_after_attempts() {
    let opener = MockPortOpener::new().with_busy_port("COM4", 5, MockScript::new());

    let result = SerialSession::open_with_retry(&opener, "COM4", fast_config(), 2, Duration::from_millis(5));

    assert!(matches!(result, Err(TransportError::Connection { .. })));
    assert_eq!(opener.open_attempts("COM4"), 2);
}

#[test]
fn test_missing_port_fails_with_connection_error() {
    let opener = MockPortOpener::new();

    let result = SerialSession::open(&opener, "/dev/ttyACM7", fast_config());

    match result {
        Err(TransportError::Connection { port, .. }) => assert_eq!(port, "/dev/ttyACM7"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("opening a missing port should fail"),
    }
}

/// With no incoming bytes the session returns the timeout sentinel within
/// the command deadline plus a small margin.
#[test]
fn test_silent_board_yields_timeout_sentinel_on_deadline() {
    // Arrange
    let opener = MockPortOpener::new().with_port("COM5", MockScript::new());
    let mut session = SerialSession::open(&opener, "COM5", fast_config()).expect("open");
    let started = Instant::now();

    // Act
    let response = session.execute(&DeviceCommand::GetSerial, None);

    // Assert
    let elapsed = started.elapsed();
    assert_eq!(response, ResponseEnvelope::Failed(TransportFailure::Timeout));
    assert_eq!(response.to_json(), json!({ "error": "Command timeout" }));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(600), "overshot deadline: {elapsed:?}");
}

/// The scan uses its own, longer deadline.
#[test]
fn test_scan_waits_for_late_networks_frame() {
    // Arrange: networks arrive after the ordinary command deadline
    let script = MockScript::new()
        .respond_with(|_| Some(b"{\"networks\":[]}\n".to_vec()))
        .reply_delay(Duration::from_millis(380));
    let opener = MockPortOpener::new().with_port("COM6", script);
    let mut session = SerialSession::open(&opener, "COM6", fast_config()).expect("open");

    // Act
    let reply = session.execute(&DeviceCommand::ScanNetworks, None).into_reply();

    // Assert
    assert_eq!(reply.map(|r| r.payload), Ok(json!({ "networks": [] })));
}

#[test]
fn test_unplugged_board_reports_communication_failure() {
    let opener = MockPortOpener::new().with_port("COM7", MockScript::new());
    let mut session = SerialSession::open(&opener, "COM7", fast_config()).expect("open");
    opener.handles("COM7")[0].fail_reads(std::io::ErrorKind::BrokenPipe);

    let response = session.execute(&DeviceCommand::GetSerial, None);

    assert!(matches!(
        response,
        ResponseEnvelope::Failed(TransportFailure::Communication(_))
    ));
}
