//! Device identity, mode, and status records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::ProtocolError;

/// A discovered board: the serial number it announced and the port it
/// announced it on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub serial: String,
    pub port: String,
}

impl DeviceIdentity {
    pub fn new(serial: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.serial, self.port)
    }
}

/// Streaming mode of the board.
///
/// `Setup` is only ever reported by the board (while it waits for
/// configuration); it cannot be selected with `switch_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Wifi,
    Uvc,
    Auto,
    Setup,
}

impl DeviceMode {
    /// Modes accepted by `switch_mode`.
    pub const SELECTABLE: [DeviceMode; 3] = [DeviceMode::Wifi, DeviceMode::Uvc, DeviceMode::Auto];

    /// The lowercase name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Uvc => "uvc",
            Self::Auto => "auto",
            Self::Setup => "setup",
        }
    }

    pub fn is_selectable(self) -> bool {
        Self::SELECTABLE.contains(&self)
    }

    /// Maps the firmware's numeric mode (`0` auto, `1` UVC, `2` WiFi).
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Auto),
            1 => Some(Self::Uvc),
            2 => Some(Self::Wifi),
            _ => None,
        }
    }

    /// Interprets a `get_device_mode` reply.
    ///
    /// Firmware has no name for every mode (auto is reported as
    /// `"unknown"`), so an unrecognised name falls back to the numeric
    /// `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] when neither the name nor the
    /// value identifies a mode.
    pub fn from_reply(name: &str, value: Option<i64>) -> Result<Self, ProtocolError> {
        name.parse().or_else(|e| value.and_then(Self::from_value).ok_or(e))
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMode {
    type Err = ProtocolError;

    /// Case-insensitive; firmware replies with e.g. `"WiFi"` or `"UVC"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(Self::Wifi),
            "uvc" => Ok(Self::Uvc),
            "auto" => Ok(Self::Auto),
            "setup" => Ok(Self::Setup),
            other => Err(ProtocolError::InvalidField {
                field: "mode",
                reason: format!("unknown device mode `{other}`"),
            }),
        }
    }
}

/// Reply to `get_wifi_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiStatus {
    #[serde(default = "unknown_status")]
    pub status: String,
    #[serde(default)]
    pub networks_configured: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Keys this tool does not interpret, kept for display.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const UNASSIGNED_IP: &str = "0.0.0.0";

fn unknown_status() -> String {
    "unknown".to_owned()
}

impl WifiStatus {
    /// The assigned address.  While none is assigned the firmware reports
    /// an empty string or `0.0.0.0` rather than omitting the key.
    pub fn ip(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty() && *ip != UNASSIGNED_IP)
    }

    /// `true` once the board holds a usable address.
    pub fn is_connected(&self) -> bool {
        self.ip().is_some()
    }
}

/// Reply to `get_serial`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialInfo {
    pub serial: String,
    pub mac: String,
}

/// Reply to `get_who_am_i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub who_am_i: String,
    pub version: String,
}

/// Read-only snapshot of a board's settings.  Each query is independent, so a
/// field is `None` when that particular query failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsSummary {
    pub serial: Option<SerialInfo>,
    pub advertised_name: Option<String>,
    pub info: Option<DeviceInfo>,
    pub led_duty_cycle: Option<u8>,
    pub led_current_ma: Option<f64>,
    pub mode: Option<DeviceMode>,
    pub wifi: Option<WifiStatus>,
}

impl SettingsSummary {
    /// `true` when every query failed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
