//! Storage infrastructure: the tool's own configuration file.
//!
//! The `config` sub-module reads host-side settings (timeouts, log level,
//! discovery hints) from the platform config directory and falls back to
//! built-in defaults when the file does not exist yet.

pub mod config;
