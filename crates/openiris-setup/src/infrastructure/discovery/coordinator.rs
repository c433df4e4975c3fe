//! Concurrent discovery across all candidate ports.
//!
//! A board only announces itself during a short setup window after power-on,
//! so ports are listened to in parallel rather than one after another.  Each
//! port gets its own OS thread running a [`HeartbeatListener`]; the async
//! side waits on a channel until either a board is found or the global
//! deadline passes.
//!
//! # How the race works (for beginners)
//!
//! ```text
//!  discover()                       listener threads
//!  ─────────                        ────────────────
//!  spawn N threads ───────────────► listen(port) ─┐
//!  timeout_at(deadline, rx.recv())                │ insert_if_absent()
//!          ◄──────────── blocking_send(found) ◄───┘
//!  wanted board registered? → return
//!  deadline passed?         → return
//! ```
//!
//! Listeners that lose the race are not joined.  They see the cancel flag (or
//! their own window expiring), drop their port, and exit on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use openiris_core::DeviceIdentity;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::listener::{HeartbeatListener, ListenSettings};
use super::registry::DeviceRegistry;
use crate::infrastructure::serial::{CandidatePort, PortOpener};

/// Description fragments of USB-serial bridges commonly found on ESP32
/// boards.  Matching ports are tried first.
pub const DEFAULT_PRIORITY_KEYWORDS: &[&str] = &[
    "cp210",
    "ch340",
    "ftdi",
    "esp32",
    "silicon labs",
    "usb-serial",
    "usb serial",
    "usb serial device",
];

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySettings {
    /// Overall deadline for one discovery run.
    pub timeout: Duration,
    pub listen: ListenSettings,
    /// Lowercase description fragments that move a port to the front.
    pub priority_keywords: Vec<String>,
    /// When set, discovery keeps listening until this serial is found
    /// instead of stopping at the first board.
    pub target_serial: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            listen: ListenSettings::default(),
            priority_keywords: DEFAULT_PRIORITY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            target_serial: None,
        }
    }
}

/// Orders `ports` so likely boards come first, keeping the original order
/// within each group.
pub fn prioritize_ports(ports: Vec<CandidatePort>, keywords: &[String]) -> Vec<CandidatePort> {
    let (mut likely, other): (Vec<_>, Vec<_>) = ports.into_iter().partition(|port| {
        let description = port.description.to_lowercase();
        keywords.iter().any(|k| description.contains(&k.to_lowercase()))
    });
    likely.extend(other);
    likely
}

/// Picks the board to connect to: the one with `serial` when given,
/// otherwise the first one identified.
pub fn select_device(devices: Vec<DeviceIdentity>, serial: Option<&str>) -> Option<DeviceIdentity> {
    match serial {
        Some(serial) => devices.into_iter().find(|d| d.serial.eq_ignore_ascii_case(serial)),
        None => devices.into_iter().next(),
    }
}

pub struct DiscoveryCoordinator {
    opener: Arc<dyn PortOpener>,
    settings: DiscoverySettings,
}

impl DiscoveryCoordinator {
    pub fn new(opener: Arc<dyn PortOpener>, settings: DiscoverySettings) -> Self {
        Self { opener, settings }
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Listens on every port concurrently and returns the boards found, in the
    /// order they were identified.
    ///
    /// Returns as soon as one board is found (or, with a target serial,
    /// that board), every listener has given up, or the deadline passes,
    /// whichever comes first.  Per-port failures are logged and never abort
    /// discovery.
    pub async fn discover(&self, ports: Vec<CandidatePort>) -> Vec<DeviceIdentity> {
        if ports.is_empty() {
            info!("no serial ports to listen on");
            return Vec::new();
        }

        let registry = Arc::new(DeviceRegistry::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel::<bool>(ports.len());
        let deadline = Instant::now() + self.settings.timeout;

        let ordered = prioritize_ports(ports, &self.settings.priority_keywords);
        info!("listening on {} ports for OpenIris heartbeats", ordered.len());

        let mut launched = 0usize;
        for (index, port) in ordered.into_iter().enumerate() {
            let listener = HeartbeatListener::new(Arc::clone(&self.opener), self.settings.listen.clone())
                .with_cancel(Arc::clone(&cancel));
            let registry = Arc::clone(&registry);
            let tx = tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("openiris-listen-{index}"))
                .spawn(move || {
                    let found = match listener.listen(&port.path) {
                        Some(identity) => {
                            let serial = identity.serial.clone();
                            if registry.insert_if_absent(identity) {
                                info!("found device {serial} on {}", port.path);
                            } else {
                                debug!("{serial} already registered; ignoring {}", port.path);
                            }
                            true
                        }
                        None => false,
                    };
                    // The receiver is gone once discovery has returned.
                    let _ = tx.blocking_send(found);
                });

            match spawned {
                Ok(_) => launched += 1,
                Err(e) => warn!("failed to spawn listener thread: {e}"),
            }
        }
        drop(tx);

        let mut reported = 0usize;
        while reported < launched {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(found)) => {
                    reported += 1;
                    let done = match self.settings.target_serial.as_deref() {
                        Some(serial) => registry.contains(serial),
                        None => !registry.is_empty(),
                    };
                    if found && done {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!("discovery deadline reached with {reported}/{launched} listeners reported");
                    break;
                }
            }
        }
        cancel.store(true, Ordering::Relaxed);

        let devices = registry.snapshot();
        info!("discovery finished: {} device(s)", devices.len());
        devices
    }
}
