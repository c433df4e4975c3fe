//! The typed command set understood by OpenIris firmware.
//!
//! Every variant knows its wire name and the exact parameter shape the
//! firmware expects, so callers never assemble JSON by hand.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::domain::device::DeviceMode;
use crate::protocol::envelope::CommandEnvelope;

/// Default reply deadline for ordinary commands.  Sessions and the config
/// file defaults both start from these two values.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);
/// Default reply deadline for `scan_networks`; a full channel sweep is slow.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials for the board's primary WiFi slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    /// Empty for open networks.
    pub password: String,
}

/// One command the host can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `true` holds the board in setup mode; `false` lets it continue booting.
    Pause(bool),
    ScanNetworks,
    SetWifi(WifiCredentials),
    ConnectWifi,
    GetWifiStatus,
    StartStreaming,
    SwitchMode(DeviceMode),
    GetDeviceMode,
    SetMdns(String),
    GetMdnsName,
    SetLedDutyCycle(u8),
    GetLedDutyCycle,
    GetLedCurrent,
    GetSerial,
    GetWhoAmI,
    RestartDevice,
}

impl DeviceCommand {
    /// The `command` string on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pause(_) => "pause",
            Self::ScanNetworks => "scan_networks",
            Self::SetWifi(_) => "set_wifi",
            Self::ConnectWifi => "connect_wifi",
            Self::GetWifiStatus => "get_wifi_status",
            Self::StartStreaming => "start_streaming",
            Self::SwitchMode(_) => "switch_mode",
            Self::GetDeviceMode => "get_device_mode",
            Self::SetMdns(_) => "set_mdns",
            Self::GetMdnsName => "get_mdns_name",
            Self::SetLedDutyCycle(_) => "set_led_duty_cycle",
            Self::GetLedDutyCycle => "get_led_duty_cycle",
            Self::GetLedCurrent => "get_led_current",
            Self::GetSerial => "get_serial",
            Self::GetWhoAmI => "get_who_am_i",
            Self::RestartDevice => "restart_device",
        }
    }

    /// The `data` object, or `None` for parameterless commands.
    pub fn params(&self) -> Option<Map<String, Value>> {
        let value = match self {
            Self::Pause(pause) => json!({ "pause": pause }),
            Self::SetWifi(creds) => json!({
                "name": "main",
                "ssid": creds.ssid,
                "password": creds.password,
                "channel": 0,
                "power": 0,
            }),
            Self::SwitchMode(mode) => json!({ "mode": mode.as_str() }),
            Self::SetMdns(hostname) => json!({ "hostname": hostname }),
            Self::SetLedDutyCycle(duty) => json!({ "dutyCycle": duty }),
            _ => return None,
        };
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> CommandEnvelope {
        CommandEnvelope::new(self.name(), self.params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::encode_request;

    #[test]
    fn test_set_wifi_uses_fixed_slot_parameters() {
        // Arrange
        let command = DeviceCommand::SetWifi(WifiCredentials {
            ssid: "lab".into(),
            password: "hunter22".into(),
        });

        // Act
        let params = command.params().expect("params");

        // Assert
        assert_eq!(params["name"], "main");
        assert_eq!(params["ssid"], "lab");
        assert_eq!(params["password"], "hunter22");
        assert_eq!(params["channel"], 0);
        assert_eq!(params["power"], 0);
    }

    #[test]
    fn test_led_duty_cycle_uses_camel_case_key() {
        let params = DeviceCommand::SetLedDutyCycle(55).params().expect("params");
        assert_eq!(params["dutyCycle"], 55);
    }

    #[test]
    fn test_parameterless_commands_omit_data() {
        let bytes = encode_request(&DeviceCommand::GetWhoAmI.to_envelope()).expect("encode");
        assert_eq!(bytes, b"{\"commands\":[{\"command\":\"get_who_am_i\"}]}\n");
    }

    #[test]
    fn test_switch_mode_sends_lowercase_name() {
        let params = DeviceCommand::SwitchMode(DeviceMode::Uvc).params().expect("params");
        assert_eq!(params["mode"], "uvc");
    }
}
