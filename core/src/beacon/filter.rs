//! Beacon admission filter
//!
//! Three stages between the radio and the aggregation pipeline: the
//! proof-of-work check, a per-(truncID, medium) rate limit, and a Sybil
//! detector that counts distinct truncated IDs per physical
//! fingerprint inside a sliding window. Every rejection is a silent
//! drop; nothing at this layer propagates upward.

use super::record::PhysicalFingerprint;
use super::wire::DecodedBeacon;
use super::pow;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Filter configuration
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Required proof-of-work difficulty in leading zero bits
    pub pow_difficulty: u8,
    /// Minimum spacing between beacons from one (truncID, medium) pair
    pub min_interval: Duration,
    /// Sliding window for Sybil counting
    pub sybil_window: Duration,
    /// Maximum distinct truncIDs per fingerprint inside the window
    pub sybil_threshold: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            pow_difficulty: pow::DEFAULT_POW_DIFFICULTY,
            min_interval: Duration::from_secs(5),
            sybil_window: Duration::from_secs(1800),
            sybil_threshold: 5,
        }
    }
}

/// Why a beacon was dropped (surfaced only through logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    InvalidPow,
    RateLimited,
    SybilThreshold,
}

/// Stateful three-stage admission filter
pub struct BeaconFilter {
    config: FilterConfig,
    /// (truncID, medium) -> last accepted timestamp
    rate: HashMap<(u16, String), SystemTime>,
    /// fingerprint -> truncID -> last seen timestamp
    sybil: HashMap<PhysicalFingerprint, HashMap<u16, SystemTime>>,
}

impl BeaconFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            rate: HashMap::new(),
            sybil: HashMap::new(),
        }
    }

    /// Run all three stages. Returns whether the beacon is admitted.
    pub fn accept(
        &mut self,
        beacon: &DecodedBeacon,
        medium_id: &str,
        fingerprint: Option<&PhysicalFingerprint>,
        now: SystemTime,
    ) -> bool {
        match self.evaluate(beacon, medium_id, fingerprint, now) {
            None => true,
            Some(reason) => {
                tracing::debug!(
                    medium = medium_id,
                    trunc_id = beacon.trunc_id(),
                    ?reason,
                    "beacon dropped"
                );
                false
            }
        }
    }

    fn evaluate(
        &mut self,
        beacon: &DecodedBeacon,
        medium_id: &str,
        fingerprint: Option<&PhysicalFingerprint>,
        now: SystemTime,
    ) -> Option<RejectReason> {
        // Stage 1: proof-of-work. Tier 3 carries none.
        if !self.pow_valid(beacon) {
            return Some(RejectReason::InvalidPow);
        }

        // Stage 2: rate limit. Tier-3 beacons have no truncID and bypass.
        if let Some(trunc_id) = beacon.trunc_id() {
            let key = (trunc_id, medium_id.to_string());
            if let Some(&last_seen) = self.rate.get(&key) {
                let elapsed = now.duration_since(last_seen).unwrap_or(Duration::ZERO);
                if elapsed < self.config.min_interval {
                    return Some(RejectReason::RateLimited);
                }
            }
            self.rate.insert(key, now);
        }

        // Stage 3: Sybil clustering. Needs both fingerprint and truncID.
        if let (Some(fingerprint), Some(trunc_id)) = (fingerprint, beacon.trunc_id()) {
            let window = self.config.sybil_window;
            let entry = self.sybil.entry(fingerprint.clone()).or_default();
            entry.retain(|_, &mut seen| {
                now.duration_since(seen).unwrap_or(Duration::ZERO) <= window
            });
            entry.insert(trunc_id, now);
            if entry.len() > self.config.sybil_threshold {
                return Some(RejectReason::SybilThreshold);
            }
        }

        None
    }

    fn pow_valid(&self, beacon: &DecodedBeacon) -> bool {
        match beacon {
            DecodedBeacon::Tier1(b) => {
                pow::verify(b.trunc_id, b.nonce, b.pow, self.config.pow_difficulty)
            }
            DecodedBeacon::Tier2(b) => {
                pow::verify(b.trunc_id, b.nonce, b.pow, self.config.pow_difficulty)
            }
            DecodedBeacon::Tier3(_) => true,
        }
    }

    /// Evict expired rate-limit entries and empty fingerprint clusters
    pub fn prune(&mut self, now: SystemTime) {
        let min_interval = self.config.min_interval;
        self.rate.retain(|_, &mut seen| {
            now.duration_since(seen).unwrap_or(Duration::ZERO) < min_interval
        });

        let window = self.config.sybil_window;
        for entries in self.sybil.values_mut() {
            entries.retain(|_, &mut seen| {
                now.duration_since(seen).unwrap_or(Duration::ZERO) <= window
            });
        }
        self.sybil.retain(|_, entries| !entries.is_empty());
    }

    #[cfg(test)]
    fn tracked_fingerprints(&self) -> usize {
        self.sybil.len()
    }
}
