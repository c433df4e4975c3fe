//! Device façade: named operations on one connected board.
//!
//! Every method builds a typed [`DeviceCommand`], sends it through a
//! [`CommandTransport`], and decodes the reply into a domain record.  Input
//! is validated before any I/O, so an invalid duty cycle or hostname never
//! reaches the wire.
//!
//! The façade owns no connection state of its own apart from the networks
//! cached by the last scan.

use std::time::{Duration, Instant};

use openiris_core::domain::network::parse_networks;
use openiris_core::domain::SettingsSummary;
use openiris_core::protocol::command::WifiCredentials;
use openiris_core::{
    CommandEnvelope, CommandError, CommandReply, DeviceCommand, DeviceInfo, DeviceMode,
    ProtocolError, ResponseEnvelope, SerialInfo, WifiNetwork, WifiStatus,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Highest LED PWM duty cycle the firmware accepts, in percent.
pub const MAX_LED_DUTY_CYCLE: u8 = 100;

/// How long [`OpenIrisDevice::wait_for_ip`] waits for an address.
pub const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay between WiFi status queries while waiting for an address.
pub const WIFI_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Sends one command envelope and waits for its reply.
///
/// `timeout` overrides the command's default deadline.  Failures are
/// returned as [`ResponseEnvelope::Failed`] values, never as panics.
#[cfg_attr(test, mockall::automock)]
pub trait CommandTransport {
    fn send_command(&mut self, envelope: &CommandEnvelope, timeout: Option<Duration>) -> ResponseEnvelope;
}

/// Error type for façade operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    /// The command was sent but did not succeed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The caller's input was rejected before anything was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A scan-dependent operation was requested before a successful scan.
    #[error("no scan results available; scan for networks first")]
    NoScanResults,

    /// The board never reported an IP address after connecting.
    #[error("board reported no IP address in time (last status: {})", .last_status.as_deref().unwrap_or("unknown"))]
    WifiNotConfirmed { last_status: Option<String> },
}

impl From<ProtocolError> for DeviceError {
    fn from(e: ProtocolError) -> Self {
        Self::Command(CommandError::Protocol(e))
    }
}

/// The operation-oriented view of one board.
pub struct OpenIrisDevice<T: CommandTransport> {
    transport: T,
    networks: Vec<WifiNetwork>,
    scan_timeout: Option<Duration>,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl<T: CommandTransport> OpenIrisDevice<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            networks: Vec::new(),
            scan_timeout: None,
            connect_timeout: WIFI_CONNECT_TIMEOUT,
            poll_interval: WIFI_POLL_INTERVAL,
        }
    }

    /// Overrides the deadline used by [`scan_networks`](Self::scan_networks).
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    /// Overrides how long and how often [`wait_for_ip`](Self::wait_for_ip)
    /// polls.
    pub fn with_connect_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.connect_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn run(&mut self, command: DeviceCommand, timeout: Option<Duration>) -> Result<CommandReply, DeviceError> {
        debug!("sending {}", command.name());
        let reply = self
            .transport
            .send_command(&command.to_envelope(), timeout)
            .into_reply();
        if let Err(e) = &reply {
            debug!("{} failed: {e}", command.name());
        }
        reply.map_err(DeviceError::from)
    }

    // ── Setup-window control ──────────────────────────────────────────────────

    /// `true` keeps the board in setup mode; `false` lets it resume booting.
    pub fn pause(&mut self, pause: bool) -> Result<(), DeviceError> {
        self.run(DeviceCommand::Pause(pause), None).map(drop)
    }

    pub fn restart(&mut self) -> Result<(), DeviceError> {
        self.run(DeviceCommand::RestartDevice, None).map(drop)
    }

    pub fn start_streaming(&mut self) -> Result<(), DeviceError> {
        self.run(DeviceCommand::StartStreaming, None).map(drop)
    }

    // ── WiFi ──────────────────────────────────────────────────────────────────

    /// Scans for access points and caches the result, strongest first.
    ///
    /// The cache is rebuilt from scratch on every call; a failed scan leaves
    /// it empty.
    pub fn scan_networks(&mut self) -> Result<&[WifiNetwork], DeviceError> {
        self.networks.clear();
        let reply = self.run(DeviceCommand::ScanNetworks, self.scan_timeout)?;
        self.networks = parse_networks(&reply.payload)?;
        info!("scan found {} networks", self.networks.len());
        Ok(&self.networks)
    }

    /// Networks from the last successful scan.
    pub fn networks(&self) -> &[WifiNetwork] {
        &self.networks
    }

    /// Stores credentials in the board's `main` WiFi slot.
    ///
    /// An empty password is allowed (open networks).
    pub fn set_wifi(&mut self, ssid: &str, password: &str) -> Result<(), DeviceError> {
        if ssid.is_empty() {
            return Err(DeviceError::InvalidInput("SSID must not be empty".into()));
        }
        let creds = WifiCredentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        };
        self.run(DeviceCommand::SetWifi(creds), None).map(drop)
    }

    /// Configures the network at `index` of the cached scan results.
    ///
    /// Secured networks require a non-empty password.
    pub fn configure_wifi_from_scan(&mut self, index: usize, password: &str) -> Result<WifiNetwork, DeviceError> {
        if self.networks.is_empty() {
            return Err(DeviceError::NoScanResults);
        }
        let network = self.networks.get(index).cloned().ok_or_else(|| {
            DeviceError::InvalidInput(format!(
                "network index {index} out of range (0..{})",
                self.networks.len()
            ))
        })?;
        if network.is_hidden() {
            return Err(DeviceError::InvalidInput("cannot select a hidden network".into()));
        }
        if !network.auth_mode.is_open() && password.is_empty() {
            return Err(DeviceError::InvalidInput(format!(
                "{} is secured ({}); a password is required",
                network.ssid,
                network.security_type()
            )));
        }
        let password = if network.auth_mode.is_open() { "" } else { password };
        self.set_wifi(&network.ssid, password)?;
        Ok(network)
    }

    pub fn connect_wifi(&mut self) -> Result<(), DeviceError> {
        self.run(DeviceCommand::ConnectWifi, None).map(drop)
    }

    pub fn wifi_status(&mut self) -> Result<WifiStatus, DeviceError> {
        Ok(self.run(DeviceCommand::GetWifiStatus, None)?.decode()?)
    }

    /// Polls the WiFi status until the board reports an address.
    ///
    /// A failed query is logged and polled again; only the deadline ends the
    /// wait.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::WifiNotConfirmed`] with the last status seen
    /// when no address arrives in time.
    pub fn wait_for_ip(&mut self) -> Result<WifiStatus, DeviceError> {
        let deadline = Instant::now() + self.connect_timeout;
        let mut last_status = None;
        loop {
            match self.wifi_status() {
                Ok(status) if status.is_connected() => {
                    info!("board connected with address {}", status.ip().unwrap_or_default());
                    return Ok(status);
                }
                Ok(status) => {
                    debug!("waiting for an address; status {}", status.status);
                    last_status = Some(status.status);
                }
                Err(e) => debug!("WiFi status query failed: {e}"),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(self.poll_interval.min(remaining));
        }
        warn!("no address after {:?}", self.connect_timeout);
        Err(DeviceError::WifiNotConfirmed { last_status })
    }

    /// Scans, stores the chosen network, connects and waits for an address.
    ///
    /// `choice` indexes the fresh scan; `None` or an out-of-range index picks
    /// the strongest visible network.
    pub fn auto_setup(&mut self, choice: Option<usize>, password: &str) -> Result<(WifiNetwork, WifiStatus), DeviceError> {
        let networks = self.scan_networks()?;
        let strongest = networks.iter().position(|n| !n.is_hidden());
        let index = match (choice, strongest) {
            (_, None) => return Err(DeviceError::NoScanResults),
            (Some(i), _) if i < networks.len() => i,
            (Some(i), Some(fallback)) => {
                warn!("network index {i} out of range (0..{}); using {fallback}", networks.len());
                fallback
            }
            (None, Some(fallback)) => fallback,
        };

        let network = self.configure_wifi_from_scan(index, password)?;
        info!("connecting to {}", network.ssid);
        self.connect_wifi()?;
        let status = self.wait_for_ip()?;
        Ok((network, status))
    }

    // ── Mode ──────────────────────────────────────────────────────────────────

    /// Takes effect after the board restarts.  Only wifi, uvc and auto can
    /// be selected.
    pub fn switch_mode(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        if !mode.is_selectable() {
            return Err(DeviceError::InvalidInput(format!("mode {mode} cannot be selected")));
        }
        self.run(DeviceCommand::SwitchMode(mode), None).map(drop)
    }

    pub fn device_mode(&mut self) -> Result<DeviceMode, DeviceError> {
        let reply = self.run(DeviceCommand::GetDeviceMode, None)?;
        let name: String = reply.field("mode")?;
        let value = reply.payload_object()?.get("value").and_then(Value::as_i64);
        Ok(DeviceMode::from_reply(&name, value)?)
    }

    // ── Network name ──────────────────────────────────────────────────────────

    /// Sets the mDNS hostname; the board is then reachable as
    /// `http://<hostname>.local/`.  The UVC device name changes too.
    pub fn set_hostname(&mut self, hostname: &str) -> Result<(), DeviceError> {
        if hostname.is_empty() {
            return Err(DeviceError::InvalidInput("hostname must not be empty".into()));
        }
        if hostname.chars().any(char::is_whitespace) {
            return Err(DeviceError::InvalidInput("hostname must not contain whitespace".into()));
        }
        self.run(DeviceCommand::SetMdns(hostname.to_string()), None).map(drop)
    }

    pub fn hostname(&mut self) -> Result<String, DeviceError> {
        Ok(self.run(DeviceCommand::GetMdnsName, None)?.field("hostname")?)
    }

    // ── LED ───────────────────────────────────────────────────────────────────

    pub fn set_led_duty_cycle(&mut self, duty_cycle: u8) -> Result<(), DeviceError> {
        if duty_cycle > MAX_LED_DUTY_CYCLE {
            return Err(DeviceError::InvalidInput(format!(
                "duty cycle must be between 0 and {MAX_LED_DUTY_CYCLE}, got {duty_cycle}"
            )));
        }
        self.run(DeviceCommand::SetLedDutyCycle(duty_cycle), None).map(drop)
    }

    pub fn led_duty_cycle(&mut self) -> Result<u8, DeviceError> {
        let raw: f64 = self
            .run(DeviceCommand::GetLedDutyCycle, None)?
            .field("led_external_pwm_duty_cycle")?;
        if !(0.0..=f64::from(MAX_LED_DUTY_CYCLE)).contains(&raw) {
            return Err(ProtocolError::InvalidField {
                field: "led_external_pwm_duty_cycle",
                reason: format!("{raw} is outside 0..={MAX_LED_DUTY_CYCLE}"),
            }
            .into());
        }
        Ok(raw.round() as u8)
    }

    pub fn led_current(&mut self) -> Result<f64, DeviceError> {
        Ok(self.run(DeviceCommand::GetLedCurrent, None)?.field("led_current_ma")?)
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    pub fn serial_info(&mut self) -> Result<SerialInfo, DeviceError> {
        Ok(self.run(DeviceCommand::GetSerial, None)?.decode()?)
    }

    pub fn device_info(&mut self) -> Result<DeviceInfo, DeviceError> {
        Ok(self.run(DeviceCommand::GetWhoAmI, None)?.decode()?)
    }

    /// Runs every read-only query.  A failed query leaves its field empty and
    /// does not stop the others.
    pub fn settings_summary(&mut self) -> SettingsSummary {
        fn keep<V>(what: &str, result: Result<V, DeviceError>) -> Option<V> {
            result.map_err(|e| warn!("could not read {what}: {e}")).ok()
        }

        SettingsSummary {
            serial: keep("serial info", self.serial_info()),
            advertised_name: keep("hostname", self.hostname()),
            info: keep("device info", self.device_info()),
            led_duty_cycle: keep("LED duty cycle", self.led_duty_cycle()),
            led_current_ma: keep("LED current", self.led_current()),
            mode: keep("device mode", self.device_mode()),
            wifi: keep("WiFi status", self.wifi_status()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
