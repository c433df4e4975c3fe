//! TOML-based configuration for the setup tool.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\OpenIris\config.toml`
//! - Linux:    `~/.config/openiris/config.toml`
//! - macOS:    `~/Library/Application Support/OpenIris/config.toml`
//!
//! The file only tunes the host side (timeouts, logging, which ports to try
//! first); nothing here is stored on the board.  Example:
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [serial]
//! scan_timeout_secs = 45
//!
//! [discovery]
//! timeout_ms = 5000
//! priority_keywords = ["cp210", "ch340"]
//! ```
//!
//! Every field carries a `#[serde(default = "...")]`, so a missing file, a
//! missing section or a missing key all fall back to the built-in timing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use openiris_core::protocol::{COMMAND_TIMEOUT, SCAN_TIMEOUT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::discovery::{DiscoverySettings, ListenSettings, DEFAULT_PRIORITY_KEYWORDS};
use crate::infrastructure::serial::session::SessionConfig;
use crate::infrastructure::serial::DEFAULT_BAUD_RATE;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial link and command timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    /// Deadline for the `pause` sent right after connecting.
    #[serde(default = "default_pause_timeout_secs")]
    pub pause_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts to open a port that is still held by a listener.
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
    #[serde(default = "default_open_retry_delay_ms")]
    pub open_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    /// How long each port is listened to for a heartbeat.
    #[serde(default = "default_listen_window_ms")]
    pub listen_window_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_priority_keywords")]
    pub priority_keywords: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_command_timeout_secs() -> u64 {
    COMMAND_TIMEOUT.as_secs()
}
fn default_scan_timeout_secs() -> u64 {
    SCAN_TIMEOUT.as_secs()
}
fn default_pause_timeout_secs() -> u64 {
    5
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_open_retries() -> u32 {
    3
}
fn default_open_retry_delay_ms() -> u64 {
    500
}
fn default_discovery_timeout_ms() -> u64 {
    3000
}
fn default_listen_window_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    500
}
fn default_priority_keywords() -> Vec<String> {
    DEFAULT_PRIORITY_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            scan_timeout_secs: default_scan_timeout_secs(),
            pause_timeout_secs: default_pause_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            open_retries: default_open_retries(),
            open_retry_delay_ms: default_open_retry_delay_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
            listen_window_ms: default_listen_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            priority_keywords: default_priority_keywords(),
        }
    }
}

impl SerialConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            pause_timeout: Duration::from_secs(self.pause_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }
}

impl DiscoveryConfig {
    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            timeout: Duration::from_millis(self.timeout_ms),
            listen: ListenSettings {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                window: Duration::from_millis(self.listen_window_ms),
                ..ListenSettings::default()
            },
            priority_keywords: self.priority_keywords.clone(),
            target_serial: None,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from `path`, or from the platform default when `path` is
/// `None`.  A missing file yields `AppConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = render_config(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Renders `config` as the TOML [`save_config`] writes.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &AppConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Resolves the platform config directory, including the `OpenIris`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("OpenIris"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("openiris"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("OpenIris"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("openiris_test_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_default_config_matches_device_timing() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.serial.command_timeout_secs, 15);
        assert_eq!(cfg.serial.scan_timeout_secs, 30);
        assert_eq!(cfg.discovery.timeout_ms, 3000);
        assert_eq!(cfg.general.log_level, "info");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[serial]
scan_timeout_secs = 45
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.serial.scan_timeout_secs, 45);
        assert_eq!(cfg.serial.command_timeout_secs, 15);
        assert_eq!(cfg.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_session_config_converts_units() {
        let mut serial = SerialConfig::default();
        serial.poll_interval_ms = 20;

        let session = serial.session_config();

        assert_eq!(session.read_timeout, Duration::from_secs(1));
        assert_eq!(session.pause_timeout, Duration::from_secs(5));
        assert_eq!(session.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_discovery_settings_carry_keywords_and_window() {
        let mut discovery = DiscoveryConfig::default();
        discovery.listen_window_ms = 1500;
        discovery.priority_keywords = vec!["ch340".into()];

        let settings = discovery.discovery_settings();

        assert_eq!(settings.listen.window, Duration::from_millis(1500));
        assert_eq!(settings.priority_keywords, vec!["ch340".to_string()]);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = temp_dir().join("config.toml");
        let cfg = load_config(Some(&path)).expect("load");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.general.log_level = "debug".to_string();
        cfg.discovery.timeout_ms = 8000;

        // Act
        save_config(&cfg, &path).expect("save");
        let loaded = load_config(Some(&path)).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_config_lists_every_section() {
        let text = render_config(&AppConfig::default()).expect("render");

        assert!(text.contains("[general]"));
        assert!(text.contains("[serial]"));
        assert!(text.contains("[discovery]"));
        assert!(text.contains("scan_timeout_secs = 30"));
        let reparsed: AppConfig = toml::from_str(&text).expect("reparse");
        assert_eq!(reparsed, AppConfig::default());
    }

    #[test]
    fn test_load_config_reports_parse_error_with_bad_file() {
        // Arrange
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("config.toml");
        std::fs::write(&path, "serial = 5 = 6").expect("write");

        // Act
        let result = load_config(Some(&path));

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
