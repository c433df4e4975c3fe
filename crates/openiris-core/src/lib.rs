//! # openiris-core
//!
//! Shared library for the OpenIris setup tooling containing the serial JSON
//! framing logic, the command/response envelopes, and the typed device
//! records that replies decode into.
//!
//! It has zero dependencies on serial ports, threads, or the file system, so
//! every piece here can be exercised with plain byte slices in tests.
//!
//! # Architecture overview (for beginners)
//!
//! An OpenIris board talks to the host over a USB serial link.  The same
//! link carries three very different kinds of text:
//!
//! - boot and runtime logs from the firmware (often ANSI-coloured),
//! - unsolicited heartbeat announcements while the board is in setup mode,
//! - JSON replies to the commands the host sends.
//!
//! This crate is split into two modules:
//!
//! - **`protocol`** – How bytes become messages.  The frame extractor pulls
//!   complete JSON objects out of the noisy stream; the envelope types wrap
//!   outgoing commands and unwrap the doubly-encoded replies.
//!
//! - **`domain`** – Typed records the replies decode into: WiFi networks,
//!   device modes, status and identity information.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceIdentity, DeviceInfo, DeviceMode, SerialInfo, WifiStatus};
pub use domain::network::{AuthMode, WifiNetwork};
pub use protocol::command::DeviceCommand;
pub use protocol::envelope::{CommandEnvelope, ResponseEnvelope, TransportFailure};
pub use protocol::frame::{extract_frame, Frame, FrameBuffer};
pub use protocol::reply::{CommandError, CommandReply};
pub use protocol::ProtocolError;
