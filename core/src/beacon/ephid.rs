//! Ephemeral ID rotation (DP-3T style)
//!
//! Short-lived identifiers derived from the identity key via HKDF. A
//! per-day seed is derived from the private key and the day number, and
//! each rotation interval within the day gets its own 4-byte ID.
//! Observers cannot link IDs across rotations without the key.

use crate::crypto::{kdf, CryptoError, KeyPair};
use std::time::{Duration, SystemTime};

/// Default rotation interval (about 10 minutes)
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(600);

const SECONDS_PER_DAY: u64 = 86_400;

/// Deterministic ephemeral ID generator for one identity key
pub struct EphIdGenerator {
    key_pair: KeyPair,
    rotation_interval: Duration,
    reference_point: SystemTime,
}

impl EphIdGenerator {
    pub fn new(key_pair: KeyPair, rotation_interval: Duration, reference_point: SystemTime) -> Self {
        Self {
            key_pair,
            rotation_interval,
            reference_point,
        }
    }

    /// Day number since the reference point, clamped at 0
    fn day_number(&self, at: SystemTime) -> u32 {
        match at.duration_since(self.reference_point) {
            Ok(elapsed) => (elapsed.as_secs() / SECONDS_PER_DAY) as u32,
            Err(_) => 0,
        }
    }

    fn seconds_since_reference(&self, at: SystemTime) -> u64 {
        at.duration_since(self.reference_point)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// HKDF(ikm = private key, info = "day" || day number)
    fn day_seed(&self, day: u32) -> Result<[u8; 32], CryptoError> {
        let mut info = Vec::with_capacity(7);
        info.extend_from_slice(b"day");
        info.extend_from_slice(&day.to_be_bytes());
        let mut seed = [0u8; 32];
        kdf::hkdf_sha256(None, self.key_pair.to_bytes().as_slice(), &info, &mut seed)?;
        Ok(seed)
    }

    /// The 4-byte ephemeral ID valid at `at`
    pub fn eph_id(&self, at: SystemTime) -> Result<[u8; 4], CryptoError> {
        let interval_secs = self.rotation_interval.as_secs().max(1);
        let epochs_per_day = (SECONDS_PER_DAY / interval_secs).max(1);

        let day = self.day_number(at);
        let seconds = self.seconds_since_reference(at);
        let epoch_index = ((seconds / interval_secs) % epochs_per_day) as u32;

        let seed = self.day_seed(day)?;
        let mut eph_id = [0u8; 4];
        kdf::hkdf_sha256(None, &seed, &epoch_index.to_be_bytes(), &mut eph_id)?;
        Ok(eph_id)
    }

    /// Truncated ID: first two bytes of the ephemeral ID, big-endian
    pub fn trunc_id(&self, at: SystemTime) -> Result<u16, CryptoError> {
        let id = self.eph_id(at)?;
        Ok(u16::from_be_bytes([id[0], id[1]]))
    }

    /// Beacon nonce: the full ephemeral ID as a big-endian u32
    pub fn nonce(&self, at: SystemTime) -> Result<u32, CryptoError> {
        Ok(u32::from_be_bytes(self.eph_id(at)?))
    }

    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }
}
