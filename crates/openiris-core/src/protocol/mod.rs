//! Protocol module: frame and line extraction, envelopes, reply decoding,
//! and the typed command set understood by OpenIris firmware.

pub mod command;
pub mod envelope;
pub mod frame;
pub mod heartbeat;
pub mod line;
pub mod reply;

pub use command::{DeviceCommand, WifiCredentials, COMMAND_TIMEOUT, SCAN_TIMEOUT};
pub use envelope::{decode_request, encode_request, CommandEnvelope, ResponseEnvelope, TransportFailure};
pub use frame::{extract_frame, extract_frame_where, Frame, FrameBuffer};
pub use heartbeat::{parse_heartbeat, HeartbeatFrame, HEARTBEAT_SETUP_MODE};
pub use line::{LineBuffer, MAX_LINE_BYTES};
pub use reply::{decode_results, CommandError, CommandReply};

use thiserror::Error;

/// Errors raised while encoding requests or decoding device replies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Text that should have been JSON could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A frame parsed as JSON but lacks a key the protocol requires.
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    /// A key is present but its value has the wrong type or range.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),
}
