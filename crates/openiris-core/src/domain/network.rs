//! WiFi scan records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ProtocolError;

/// RSSI assumed for a record that omits it; sorts such records last.
const MISSING_RSSI: i32 = -100;

/// Authentication mode reported by the ESP32 WiFi stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum AuthMode {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    Unknown(u8),
}

impl From<u8> for AuthMode {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Wep,
            2 => Self::WpaPsk,
            3 => Self::Wpa2Psk,
            4 => Self::WpaWpa2Psk,
            5 => Self::Wpa2Enterprise,
            6 => Self::Wpa3Psk,
            7 => Self::Wpa2Wpa3Psk,
            n => Self::Unknown(n),
        }
    }
}

impl From<AuthMode> for u8 {
    fn from(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa2Enterprise => 5,
            AuthMode::Wpa3Psk => 6,
            AuthMode::Wpa2Wpa3Psk => 7,
            AuthMode::Unknown(n) => n,
        }
    }
}

impl AuthMode {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("Open"),
            Self::Wep => f.write_str("WEP"),
            Self::WpaPsk => f.write_str("WPA PSK"),
            Self::Wpa2Psk => f.write_str("WPA2 PSK"),
            Self::WpaWpa2Psk => f.write_str("WPA WPA2 PSK"),
            Self::Wpa2Enterprise => f.write_str("WPA2 Enterprise"),
            Self::Wpa3Psk => f.write_str("WPA3 PSK"),
            Self::Wpa2Wpa3Psk => f.write_str("WPA2 WPA3 PSK"),
            Self::Unknown(n) => write!(f, "Unknown ({n})"),
        }
    }
}

/// One access point from a `scan_networks` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiNetwork {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_rssi")]
    pub rssi: i32,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
}

fn default_rssi() -> i32 {
    MISSING_RSSI
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Open
}

impl WifiNetwork {
    /// Human-readable security label, e.g. `"WPA2 PSK"`.
    pub fn security_type(&self) -> String {
        self.auth_mode.to_string()
    }

    /// Hidden networks broadcast an empty SSID.
    pub fn is_hidden(&self) -> bool {
        self.ssid.is_empty()
    }
}

/// Parses the `{"networks": [...]}` payload of a scan reply, strongest
/// signal first.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingKey`] if `networks` is absent and
/// [`ProtocolError::InvalidField`] if a record has the wrong shape.
///
/// # Examples
///
/// ```rust
/// use openiris_core::domain::network::parse_networks;
/// use serde_json::json;
///
/// let payload = json!({"networks": [
///     {"ssid": "far", "channel": 1, "rssi": -80, "mac_address": "aa", "auth_mode": 0},
///     {"ssid": "near", "channel": 6, "rssi": -40, "mac_address": "bb", "auth_mode": 3},
/// ]});
/// let networks = parse_networks(&payload).unwrap();
/// assert_eq!(networks[0].ssid, "near");
/// ```
pub fn parse_networks(payload: &Value) -> Result<Vec<WifiNetwork>, ProtocolError> {
    let raw = payload
        .get("networks")
        .ok_or(ProtocolError::MissingKey("networks"))?;
    let mut networks: Vec<WifiNetwork> =
        serde_json::from_value(raw.clone()).map_err(|e| ProtocolError::InvalidField {
            field: "networks",
            reason: e.to_string(),
        })?;
    // Stable sort keeps the device's order among equal signal strengths.
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    Ok(networks)
}

/// Number of networks seen on each channel, ordered by channel.
pub fn channel_distribution(networks: &[WifiNetwork]) -> BTreeMap<u8, usize> {
    let mut counts = BTreeMap::new();
    for network in networks {
        *counts.entry(network.channel).or_insert(0) += 1;
    }
    counts
}
