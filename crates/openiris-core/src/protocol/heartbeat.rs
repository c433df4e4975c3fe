//! Setup-mode heartbeat announcements.
//!
//! While a board sits in setup mode it periodically prints a line such as
//! `{"heartbeat":"openiris_setup_mode","serial":"AB12CD34"}`.  Discovery
//! listens for exactly this shape; any other JSON on the line is ignored.

use serde::Deserialize;

use crate::protocol::frame::Frame;

/// Heartbeat marker value announced by boards in setup mode.
pub const HEARTBEAT_SETUP_MODE: &str = "openiris_setup_mode";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeartbeatFrame {
    pub heartbeat: String,
    pub serial: String,
}

impl HeartbeatFrame {
    /// `true` when this is a setup-mode announcement carrying a usable serial.
    pub fn is_setup_mode(&self) -> bool {
        self.heartbeat == HEARTBEAT_SETUP_MODE && !self.serial.is_empty()
    }

    /// Interprets an already-extracted frame as a setup-mode heartbeat.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let heartbeat = frame.get("heartbeat")?.as_str()?;
        let serial = frame.get("serial")?.as_str()?;
        let hb = Self {
            heartbeat: heartbeat.to_owned(),
            serial: serial.to_owned(),
        };
        hb.is_setup_mode().then_some(hb)
    }
}

/// Parses one text line as a setup-mode heartbeat.
///
/// Returns `None` for blank lines, non-JSON text, other JSON documents, and
/// heartbeats with a different marker or an empty serial.
///
/// # Examples
///
/// ```rust
/// use openiris_core::protocol::heartbeat::parse_heartbeat;
///
/// let hb = parse_heartbeat(r#"{"heartbeat":"openiris_setup_mode","serial":"AB12"}"#).unwrap();
/// assert_eq!(hb.serial, "AB12");
/// assert!(parse_heartbeat("I (120) wifi: connected").is_none());
/// ```
pub fn parse_heartbeat(line: &str) -> Option<HeartbeatFrame> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str::<HeartbeatFrame>(line)
        .ok()
        .filter(HeartbeatFrame::is_setup_mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_setup_mode_heartbeat_with_surrounding_whitespace() {
        let hb = parse_heartbeat("  {\"heartbeat\":\"openiris_setup_mode\",\"serial\":\"X1\"}\r\n");
        assert_eq!(hb.map(|h| h.serial), Some("X1".to_owned()));
    }

    #[test]
    fn test_ignores_other_heartbeat_markers() {
        assert!(parse_heartbeat(r#"{"heartbeat":"streaming","serial":"X1"}"#).is_none());
    }

    #[test]
    fn test_ignores_empty_serial() {
        assert!(parse_heartbeat(r#"{"heartbeat":"openiris_setup_mode","serial":""}"#).is_none());
    }

    #[test]
    fn test_ignores_command_replies() {
        assert!(parse_heartbeat(r#"{"results":["{}"]}"#).is_none());
    }

    #[test]
    fn test_from_frame_matches_parse() {
        // Arrange
        let mut frame = Frame::new();
        frame.insert("heartbeat".into(), HEARTBEAT_SETUP_MODE.into());
        frame.insert("serial".into(), "Z9".into());

        // Act
        let hb = HeartbeatFrame::from_frame(&frame);

        // Assert
        assert_eq!(hb.map(|h| h.serial), Some("Z9".to_owned()));
    }
}
