//! Two-layer peer record storage
//!
//! Unconfirmed sightings are keyed by truncated ID; confirmed records by
//! peer ID. Promotion atomically moves a peer from the first layer into
//! the second. Store operations never fail: an epoch-regressing upsert
//! is a silent no-op.

use super::record::{ConfirmedPeerRecord, UnconfirmedSighting};
use crate::crypto::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;

/// Storage contract for the beacon discovery pipeline
pub trait BeaconPeerStore: Send + Sync {
    /// Insert or replace the sighting for its truncated ID
    fn add_sighting(&self, sighting: UnconfirmedSighting);

    /// Sightings matching a truncated ID. The in-memory implementation
    /// keeps at most one per ID.
    fn sightings(&self, trunc_id: u16) -> Vec<UnconfirmedSighting>;

    /// Atomically remove the sighting for `trunc_id` (if any) and insert
    /// the confirmed record. Returns whether a sighting was removed.
    fn promote_sighting(&self, trunc_id: u16, record: ConfirmedPeerRecord) -> bool;

    /// Insert or replace a confirmed record, unless the stored record
    /// has a newer epoch
    fn upsert(&self, record: ConfirmedPeerRecord);

    fn get(&self, peer_id: &PeerId) -> Option<ConfirmedPeerRecord>;

    fn all_confirmed(&self) -> Vec<ConfirmedPeerRecord>;

    /// Confirmed records that are still valid after `since`
    fn confirmed_newer_than(&self, since: SystemTime) -> Vec<ConfirmedPeerRecord>;

    /// Drop records that are no longer valid at `now`; returns how many
    /// were removed
    fn remove_expired(&self, now: SystemTime) -> usize;
}

#[derive(Default)]
struct Inner {
    sightings: HashMap<u16, UnconfirmedSighting>,
    confirmed: HashMap<PeerId, ConfirmedPeerRecord>,
}

/// In-memory store used by the discovery pipeline
#[derive(Default)]
pub struct MemoryBeaconPeerStore {
    inner: RwLock<Inner>,
}

impl MemoryBeaconPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unconfirmed sightings currently held
    pub fn sighting_count(&self) -> usize {
        self.inner.read().sightings.len()
    }
}

impl BeaconPeerStore for MemoryBeaconPeerStore {
    fn add_sighting(&self, sighting: UnconfirmedSighting) {
        self.inner
            .write()
            .sightings
            .insert(sighting.trunc_id, sighting);
    }

    fn sightings(&self, trunc_id: u16) -> Vec<UnconfirmedSighting> {
        self.inner
            .read()
            .sightings
            .get(&trunc_id)
            .cloned()
            .into_iter()
            .collect()
    }

    fn promote_sighting(&self, trunc_id: u16, record: ConfirmedPeerRecord) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.sightings.remove(&trunc_id).is_some();
        match inner.confirmed.get(&record.peer_id) {
            Some(existing) if existing.epoch > record.epoch => {}
            _ => {
                inner.confirmed.insert(record.peer_id.clone(), record);
            }
        }
        removed
    }

    fn upsert(&self, record: ConfirmedPeerRecord) {
        let mut inner = self.inner.write();
        match inner.confirmed.get(&record.peer_id) {
            // Epoch regression: silently ignore
            Some(existing) if existing.epoch > record.epoch => {}
            _ => {
                inner.confirmed.insert(record.peer_id.clone(), record);
            }
        }
    }

    fn get(&self, peer_id: &PeerId) -> Option<ConfirmedPeerRecord> {
        self.inner.read().confirmed.get(peer_id).cloned()
    }

    fn all_confirmed(&self) -> Vec<ConfirmedPeerRecord> {
        self.inner.read().confirmed.values().cloned().collect()
    }

    fn confirmed_newer_than(&self, since: SystemTime) -> Vec<ConfirmedPeerRecord> {
        self.inner
            .read()
            .confirmed
            .values()
            .filter(|record| record.expires_at > since)
            .cloned()
            .collect()
    }

    fn remove_expired(&self, now: SystemTime) -> usize {
        let mut inner = self.inner.write();
        let before = inner.confirmed.len();
        inner.confirmed.retain(|_, record| record.is_valid(now));
        before - inner.confirmed.len()
    }
}
