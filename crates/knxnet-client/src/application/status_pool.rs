//! Per-address cache of the most recently observed group value.
//!
//! Every observed write or response installs a whole-snapshot replacement
//! keyed by the destination address. Issuing a read marks the entry dirty:
//! the stale snapshot stays readable, but fresh-only readers wait for the
//! next replacement. Entries are sharded per key (dashmap), never locked
//! table-wide.

use std::time::Duration;

use dashmap::DashMap;
use knxnet_core::protocol::cemi::Apci;
use knxnet_core::{IndividualAddress, KnxAddress};
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

/// Immutable snapshot of one observed bus value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Device that put the value on the bus.
    pub source: IndividualAddress,
    /// Operation that carried it (write or response).
    pub apci: Apci,
    pub data: Vec<u8>,
    pub created_at: Instant,
}

#[derive(Debug)]
struct Entry {
    snapshot: StatusSnapshot,
    dirty: bool,
}

/// Concurrent status cache shared by the inbox handlers and readers.
#[derive(Debug, Default)]
pub struct StatusPool {
    entries: DashMap<KnxAddress, Entry>,
    notify: Notify,
}

impl StatusPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh snapshot for `address`, clearing the dirty flag.
    pub fn update(&self, address: KnxAddress, snapshot: StatusSnapshot) {
        self.entries.insert(
            address,
            Entry {
                snapshot,
                dirty: false,
            },
        );
        self.notify.notify_waiters();
    }

    /// Marks the entry stale. No-op when the address was never observed.
    pub fn set_dirty(&self, address: KnxAddress) {
        if let Some(mut entry) = self.entries.get_mut(&address) {
            entry.dirty = true;
        }
    }

    /// Snapshot for `address` right now, dirty or not.
    pub fn peek(&self, address: KnxAddress) -> Option<StatusSnapshot> {
        self.entries.get(&address).map(|e| e.snapshot.clone())
    }

    fn fresh(&self, address: KnxAddress) -> Option<StatusSnapshot> {
        self.entries
            .get(&address)
            .filter(|e| !e.dirty)
            .map(|e| e.snapshot.clone())
    }

    /// Returns the snapshot for `address`.
    ///
    /// With `must_be_fresh`, waits up to `wait_budget` for a non-dirty
    /// snapshot, re-checking at least every `check_interval`. Absence at
    /// timeout is a normal `None`, never an error.
    pub async fn get(
        &self,
        address: KnxAddress,
        must_be_fresh: bool,
        wait_budget: Duration,
        check_interval: Duration,
    ) -> Option<StatusSnapshot> {
        if !must_be_fresh {
            return self.peek(address);
        }
        let deadline = Instant::now() + wait_budget;
        loop {
            if let Some(snapshot) = self.fresh(address) {
                return Some(snapshot);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(check_interval);
            let _ = timeout(wait, self.notify.notified()).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
