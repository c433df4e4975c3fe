//! Per-discovery registry of identified boards.

use std::sync::{Mutex, PoisonError};

use openiris_core::DeviceIdentity;

/// Boards found so far, keyed by serial number, in insertion order.
///
/// Shared between listener threads; the lock is held only for the
/// insert-if-absent check, never across I/O.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Mutex<Vec<DeviceIdentity>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `identity` unless its serial is already known.  Returns `true`
    /// if it was inserted; the first port to report a serial wins.
    pub fn insert_if_absent(&self, identity: DeviceIdentity) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.serial == identity.serial) {
            return false;
        }
        entries.push(identity);
        true
    }

    /// Whether a board with `serial` has been recorded.  Serials compare
    /// case-insensitively.
    pub fn contains(&self, serial: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.serial.eq_ignore_ascii_case(serial))
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// A copy of the entries in insertion order.
    pub fn snapshot(&self) -> Vec<DeviceIdentity> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
