//! Device discovery over serial heartbeats.
//!
//! # Sub-modules
//!
//! - **`listener`** – Listens on one port for a setup-mode heartbeat within a
//!   bounded window.
//!
//! - **`registry`** – Lock-guarded list of identified boards, one entry per
//!   serial number; created fresh for each discovery run.
//!
//! - **`coordinator`** – Fans listeners out over every candidate port on their
//!   own threads and returns as soon as a board (or the requested board) is
//!   found.

pub mod coordinator;
pub mod listener;
pub mod registry;

pub use coordinator::{
    prioritize_ports, select_device, DiscoveryCoordinator, DiscoverySettings, DEFAULT_PRIORITY_KEYWORDS,
};
pub use listener::{HeartbeatListener, ListenSettings};
pub use registry::DeviceRegistry;
