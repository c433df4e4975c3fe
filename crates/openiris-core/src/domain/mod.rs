//! Typed records that device replies decode into.

pub mod device;
pub mod network;

pub use device::{DeviceIdentity, DeviceInfo, DeviceMode, SerialInfo, SettingsSummary, WifiStatus};
pub use network::{channel_distribution, parse_networks, AuthMode, WifiNetwork};
