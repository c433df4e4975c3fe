//! Application layer use cases for the setup tool.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (typed records in `openiris_core`) and the infrastructure (serial ports,
//! threads, files).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** protocol commands to fulfil a user goal (e.g., "put the
//!   board on my WiFi network").
//! - **Depend on abstractions** (traits) rather than concrete serial ports,
//!   so every use case can be tested against a scripted transport.
//! - **Contain no OS calls, no serial I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`device`** – The device façade: one method per firmware command, with
//!   input validation and typed results.  CLI code depends only on this.
//!
//! - **`monitor`** – Classifies the raw output of a running board into log
//!   text, heartbeats and protocol frames.

pub mod device;
pub mod monitor;
