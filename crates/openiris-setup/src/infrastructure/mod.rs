//! Infrastructure layer for the setup tool.
//!
//! Contains OS-facing adapters: serial ports, the threaded discovery
//! fan-out, and file-system storage for the tool's own settings.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `openiris_core`, but MUST NOT be imported by the `application` layer.

pub mod discovery;
pub mod serial;
pub mod storage;
