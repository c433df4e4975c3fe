//! Integration tests for `OpenIrisDevice` running over a real
//! `SerialSession` and a scripted in-memory board.
//!
//! Unlike the unit tests (which mock the transport trait), these exercise
//! the full path: typed command → request line → noisy reply bytes → frame
//! extraction → two-stage decode → domain record.

use std::time::Duration;

use openiris_core::protocol::CommandEnvelope;
use openiris_core::{AuthMode, DeviceMode};
use openiris_setup::application::device::{DeviceError, OpenIrisDevice};
use openiris_setup::infrastructure::serial::mock::{MockLinkHandle, MockScript, MockSerialLink};
use openiris_setup::infrastructure::serial::session::{SerialSession, SessionConfig};
use serde_json::{json, Value};

fn fast_config() -> SessionConfig {
    SessionConfig {
        read_timeout: Duration::from_millis(20),
        command_timeout: Duration::from_millis(250),
        scan_timeout: Duration::from_millis(400),
        pause_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(5),
    }
}

/// Wraps `inner` the way firmware does: a results array of JSON strings,
/// preceded by a coloured log line.
fn reply(inner: Value) -> Vec<u8> {
    let mut bytes = b"\x1b[0;32mI (1234) CommandManager: done\x1b[0m\r\n".to_vec();
    bytes.extend(format!("{}\r\n", json!({ "results": [inner.to_string()] })).into_bytes());
    bytes
}

fn success(result: Value) -> Vec<u8> {
    reply(json!({ "result": result.to_string(), "status": "success" }))
}

/// A board that answers the commands a setup session typically sends.
fn scripted_board(request: &CommandEnvelope) -> Option<Vec<u8>> {
    let bytes = match request.command.as_str() {
        "scan_networks" => {
            let networks = json!({ "networks": [
                { "ssid": "office", "channel": 6, "rssi": -71, "mac_address": "aa:aa", "auth_mode": 3 },
                { "ssid": "", "channel": 11, "rssi": -40, "mac_address": "bb:bb", "auth_mode": 3 },
                { "ssid": "cafe", "channel": 1, "rssi": -55, "mac_address": "cc:cc", "auth_mode": 0 }
            ]});
            let mut bytes = b"I (2000) wifi: scan start\r\n".to_vec();
            bytes.extend(format!("{networks}\r\n").into_bytes());
            bytes
        }
        "get_serial" => success(json!({ "serial": "ABC123", "mac": "AA:BB:CC:DD:EE:FF" })),
        "get_mdns_name" => success(json!({ "hostname": "openiristracker" })),
        "get_who_am_i" => success(json!({ "who_am_i": "OpenIris Babble", "version": "1.6.0" })),
        "get_led_duty_cycle" => success(json!({ "led_external_pwm_duty_cycle": 60 })),
        "get_led_current" => success(json!({ "led_current_ma": 12.5 })),
        "get_device_mode" => success(json!({ "mode": "UVC" })),
        "get_wifi_status" => success(json!({
            "status": "connected",
            "networks_configured": 1,
            "ip_address": "192.168.1.42"
        })),
        "set_mdns" => reply(json!({ "result": "mdns name already in use", "status": "error" })),
        _ => success(json!("ok")),
    };
    Some(bytes)
}

fn device(script: MockScript) -> (OpenIrisDevice<SerialSession>, MockLinkHandle) {
    let (link, handle) = MockSerialLink::new(script);
    let session = SerialSession::from_link("mock", Box::new(link), fast_config());
    (OpenIrisDevice::new(session), handle)
}

#[test]
fn test_scan_then_configure_by_index() {
    // Arrange
    let (mut device, handle) = device(MockScript::new().respond_with(scripted_board));

    // Act
    let ssids: Vec<String> = device
        .scan_networks()
        .expect("scan")
        .iter()
        .map(|n| n.ssid.clone())
        .collect();
    let chosen = device.configure_wifi_from_scan(1, "").expect("configure open network");

    // Assert: strongest first, open network needs no password
    assert_eq!(ssids, vec!["", "cafe", "office"]);
    assert_eq!(chosen.ssid, "cafe");
    assert_eq!(chosen.auth_mode, AuthMode::Open);
    let set_wifi = handle
        .requests()
        .into_iter()
        .find(|r| r.command == "set_wifi")
        .expect("set_wifi sent");
    let data = set_wifi.data.expect("set_wifi data");
    assert_eq!(data["ssid"], "cafe");
    assert_eq!(data["password"], "");
    assert_eq!(data["name"], "main");
}

#[test]
fn test_auto_wifi_connects_and_reports_address() {
    // Arrange
    let (device, handle) = device(MockScript::new().respond_with(scripted_board));
    let mut device = device.with_connect_wait(Duration::from_secs(1), Duration::from_millis(10));

    // Act
    let (network, status) = device.auto_setup(Some(1), "").expect("auto setup");

    // Assert
    assert_eq!(network.ssid, "cafe");
    assert_eq!(status.ip(), Some("192.168.1.42"));
    let commands: Vec<String> = handle.requests().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["scan_networks", "set_wifi", "connect_wifi", "get_wifi_status"]);
}

#[test]
fn test_auto_mode_board_reports_auto() {
    // Arrange: auto-mode firmware names the mode "unknown" and sends value 0
    let script = MockScript::new().respond_with(|request| match request.command.as_str() {
        "get_device_mode" => Some(reply(json!({
            "result": "{ \"mode\": \"unknown\", \"value\": 0 }",
            "status": "success"
        }))),
        _ => scripted_board(request),
    });
    let (mut device, _handle) = device(script);

    // Act / Assert
    assert_eq!(device.device_mode(), Ok(DeviceMode::Auto));
}

#[test]
fn test_hidden_network_cannot_be_selected() {
    let (mut device, handle) = device(MockScript::new().respond_with(scripted_board));
    device.scan_networks().expect("scan");

    let result = device.configure_wifi_from_scan(0, "secret");

    assert!(matches!(result, Err(DeviceError::InvalidInput(_))));
    assert!(handle.requests().iter().all(|r| r.command != "set_wifi"));
}

#[test]
fn test_summary_reads_every_setting() {
    // Arrange
    let (mut device, _handle) = device(MockScript::new().respond_with(scripted_board));

    // Act
    let summary = device.settings_summary();

    // Assert
    assert_eq!(summary.serial.as_ref().map(|s| s.serial.as_str()), Some("ABC123"));
    assert_eq!(summary.advertised_name.as_deref(), Some("openiristracker"));
    assert_eq!(summary.info.as_ref().map(|i| i.version.as_str()), Some("1.6.0"));
    assert_eq!(summary.led_duty_cycle, Some(60));
    assert_eq!(summary.led_current_ma, Some(12.5));
    assert_eq!(summary.mode, Some(DeviceMode::Uvc));
    assert_eq!(summary.wifi.as_ref().and_then(|w| w.ip()), Some("192.168.1.42"));
}

#[test]
fn test_summary_keeps_answers_when_board_stops_replying() {
    // Arrange: only the serial query is answered
    let script = MockScript::new().respond_with(|request| match request.command.as_str() {
        "get_serial" => scripted_board(request),
        _ => None,
    });
    let (mut device, _handle) = device(script);

    // Act
    let summary = device.settings_summary();

    // Assert
    assert!(summary.serial.is_some());
    assert!(summary.advertised_name.is_none());
    assert!(summary.wifi.is_none());
    assert!(!summary.is_empty());
}

#[test]
fn test_rejected_command_surfaces_device_detail() {
    let (mut device, _handle) = device(MockScript::new().respond_with(scripted_board));

    let err = device.set_hostname("openiris").expect_err("board rejects the name");

    assert!(err.to_string().contains("mdns name already in use"), "got: {err}");
}

#[test]
fn test_mode_switch_and_invalid_inputs() {
    // Arrange
    let (mut device, handle) = device(MockScript::new().respond_with(scripted_board));

    // Act
    device.switch_mode(DeviceMode::Wifi).expect("switch mode");
    let bad_duty = device.set_led_duty_cycle(101);
    let bad_name = device.set_hostname("two words");

    // Assert
    assert!(matches!(bad_duty, Err(DeviceError::InvalidInput(_))));
    assert!(matches!(bad_name, Err(DeviceError::InvalidInput(_))));
    let commands: Vec<String> = handle.requests().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["switch_mode"]);
}
