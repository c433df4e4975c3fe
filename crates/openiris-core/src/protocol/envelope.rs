//! Command and response envelopes.
//!
//! Wire format of a request (one line, UTF-8):
//! ```text
//! {"commands":[{"command":"<name>","data":{...}}]}\n
//! ```
//! The `commands` array always holds exactly one envelope; the array form is
//! kept because the firmware's parser expects it.
//!
//! A reply arrives as `{"results":["<json-string>"]}`.  When no reply
//! arrives, or the link fails, the session synthesizes a failure locally;
//! [`ResponseEnvelope::to_json`] renders it as the `{"error": "..."}`
//! sentinel the rest of the tooling understands.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::command::DeviceCommand;
use crate::protocol::frame::Frame;
use crate::protocol::reply::{decode_results, CommandError, CommandReply};
use crate::protocol::ProtocolError;

/// A single command addressed to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl CommandEnvelope {
    /// Creates an envelope.  An empty parameter map is omitted on the wire.
    pub fn new(command: impl Into<String>, data: Option<Map<String, Value>>) -> Self {
        Self {
            command: command.into(),
            data: data.filter(|d| !d.is_empty()),
        }
    }

    /// Scans answer with a raw `{"networks": [...]}` frame instead of the
    /// usual `results` wrapper.
    pub fn expects_networks(&self) -> bool {
        self.command == DeviceCommand::ScanNetworks.name()
    }
}

#[derive(Serialize)]
struct CommandRequestRef<'a> {
    commands: &'a [CommandEnvelope],
}

#[derive(Deserialize)]
struct CommandRequest {
    commands: Vec<CommandEnvelope>,
}

/// Encodes `envelope` as a newline-terminated request line.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use openiris_core::protocol::envelope::{encode_request, CommandEnvelope};
///
/// let bytes = encode_request(&CommandEnvelope::new("get_serial", None)).unwrap();
/// assert_eq!(bytes, b"{\"commands\":[{\"command\":\"get_serial\"}]}\n");
/// ```
pub fn encode_request(envelope: &CommandEnvelope) -> Result<Vec<u8>, ProtocolError> {
    let request = CommandRequestRef {
        commands: std::slice::from_ref(envelope),
    };
    let mut bytes =
        serde_json::to_vec(&request).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes a request line back into its envelope, as the device does.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] for invalid JSON and
/// [`ProtocolError::MissingKey`] when the `commands` array is empty.
pub fn decode_request(bytes: &[u8]) -> Result<CommandEnvelope, ProtocolError> {
    let line = String::from_utf8_lossy(bytes);
    let request: CommandRequest = serde_json::from_str(line.trim_end())
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    request
        .commands
        .into_iter()
        .next()
        .ok_or(ProtocolError::MissingKey("commands"))
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Why a command produced no device reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("Command timeout")]
    Timeout,
    #[error("Device not connected")]
    NotConnected,
    #[error("Communication error: {0}")]
    Communication(String),
}

/// The outcome of one request/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    /// The `results` array of a reply frame.  Entries are usually JSON-encoded
    /// strings, but already-decoded objects are accepted too.
    Results(Vec<Value>),
    /// A locally synthesized failure; never sent by the device.
    Failed(TransportFailure),
}

impl ResponseEnvelope {
    pub fn timeout() -> Self {
        Self::Failed(TransportFailure::Timeout)
    }

    /// Builds a response from a frame carrying a `results` array.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingKey`] or [`ProtocolError::InvalidField`]
    /// when the frame has no usable `results` array.
    pub fn from_results_frame(mut frame: Frame) -> Result<Self, ProtocolError> {
        match frame.remove("results") {
            Some(Value::Array(results)) => Ok(Self::Results(results)),
            Some(other) => Err(ProtocolError::InvalidField {
                field: "results",
                reason: format!("expected array, got {other}"),
            }),
            None => Err(ProtocolError::MissingKey("results")),
        }
    }

    /// Wraps a raw `{"networks":[...]}` scan frame as a successful result so
    /// scan replies flow through the same decoding path as every other
    /// command.
    pub fn from_networks_frame(frame: Frame) -> Self {
        Self::Results(vec![json!({ "result": Value::Object(frame), "status": "success" })])
    }

    /// Renders the envelope in its wire/sentinel JSON shape.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Results(results) => json!({ "results": results }),
            Self::Failed(failure) => json!({ "error": failure.to_string() }),
        }
    }

    /// `true` for a sentinel failure or a reply whose status is not `success`.
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Failed(_) => true,
            Self::Results(results) => decode_results(results).map_or(true, |r| !r.is_success()),
        }
    }

    /// Performs the two-stage decode and classifies the outcome.
    ///
    /// # Errors
    ///
    /// Transport failures map onto [`CommandError::Timeout`],
    /// [`CommandError::NotConnected`] and [`CommandError::Communication`];
    /// undecodable replies onto [`CommandError::Protocol`]; a decoded status
    /// other than `success` onto [`CommandError::Rejected`].
    pub fn into_reply(self) -> Result<CommandReply, CommandError> {
        let results = match self {
            Self::Failed(failure) => return Err(failure.into()),
            Self::Results(results) => results,
        };
        let reply = decode_results(&results)?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(CommandError::Rejected {
                status: reply.status.clone().unwrap_or_default(),
                detail: reply.detail(),
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_wraps_single_envelope_and_appends_newline() {
        // Arrange
        let mut data = Map::new();
        data.insert("pause".into(), Value::Bool(true));
        let envelope = CommandEnvelope::new("pause", Some(data));

        // Act
        let bytes = encode_request(&envelope).expect("encode");

        // Assert
        assert_eq!(bytes, b"{\"commands\":[{\"command\":\"pause\",\"data\":{\"pause\":true}}]}\n");
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_only_scan_envelope_expects_networks_frame() {
        assert!(DeviceCommand::ScanNetworks.to_envelope().expects_networks());
        assert!(!DeviceCommand::GetWifiStatus.to_envelope().expects_networks());
        assert!(!CommandEnvelope::new("scan", None).expects_networks());
    }

    #[test]
    fn test_empty_parameters_are_omitted() {
        let envelope = CommandEnvelope::new("scan_networks", Some(Map::new()));
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn test_decode_request_rejects_empty_command_list() {
        let result = decode_request(b"{\"commands\":[]}\n");
        assert_eq!(result, Err(ProtocolError::MissingKey("commands")));
    }

    #[test]
    fn test_decode_request_rejects_garbage() {
        assert!(matches!(
            decode_request(b"not json\n"),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_timeout_renders_error_sentinel() {
        assert_eq!(
            ResponseEnvelope::timeout().to_json(),
            json!({ "error": "Command timeout" })
        );
    }

    #[test]
    fn test_from_results_frame_requires_array() {
        // Arrange
        let mut frame = Frame::new();
        frame.insert("results".into(), json!("nope"));

        // Act
        let result = ResponseEnvelope::from_results_frame(frame);

        // Assert
        assert!(matches!(result, Err(ProtocolError::InvalidField { field: "results", .. })));
    }

    #[test]
    fn test_sentinel_and_rejected_status_are_both_failures() {
        let sentinel = ResponseEnvelope::timeout();
        let rejected = ResponseEnvelope::Results(vec![json!(
            r#"{"result":"bad mode","status":"error"}"#
        )]);
        let accepted = ResponseEnvelope::Results(vec![json!(
            r#"{"result":"ok","status":"success"}"#
        )]);

        assert!(sentinel.is_failure());
        assert!(rejected.is_failure());
        assert!(!accepted.is_failure());
    }

    #[test]
    fn test_into_reply_maps_timeout() {
        assert_eq!(
            ResponseEnvelope::timeout().into_reply(),
            Err(CommandError::Timeout)
        );
    }

    #[test]
    fn test_into_reply_maps_rejected_status() {
        // Arrange
        let envelope = ResponseEnvelope::Results(vec![json!(
            r#"{"result":"invalid mode","status":"error"}"#
        )]);

        // Act
        let result = envelope.into_reply();

        // Assert
        assert_eq!(
            result,
            Err(CommandError::Rejected {
                status: "error".into(),
                detail: "invalid mode".into(),
            })
        );
    }

    #[test]
    fn test_networks_frame_decodes_as_successful_reply() {
        // Arrange
        let mut frame = Frame::new();
        frame.insert("networks".into(), json!([]));

        // Act
        let reply = ResponseEnvelope::from_networks_frame(frame)
            .into_reply()
            .expect("reply");

        // Assert
        assert_eq!(reply.payload, json!({ "networks": [] }));
    }
}
