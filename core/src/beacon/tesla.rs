//! Micro-TESLA delayed key disclosure
//!
//! A reverse-traversed SHA-256 hash chain: keys are consumed from the
//! end of the chain towards the seed, so a receiver can authenticate an
//! earlier epoch's MAC once the later beacon discloses its key. The
//! chain invariant is `SHA256(K[i]) == K[i-1]` for every used epoch.

use crate::crypto::kdf;

/// Bytes of the previous key disclosed in tier-2 beacons
pub const DISCLOSED_KEY_LEN: usize = 8;

/// Hash chain with epoch bookkeeping
#[derive(Debug, Clone)]
pub struct MicroTesla {
    /// chain[i] is the key for epoch i (already reverse-ordered)
    chain: Vec<[u8; 32]>,
    current_epoch: usize,
}

impl MicroTesla {
    /// Build a chain of `length` keys from a secret seed.
    ///
    /// The tail of the generation order is epoch 0: the last generated
    /// hash is used first so that disclosing an old key never reveals a
    /// future one.
    pub fn new(seed: &[u8], length: usize) -> Self {
        assert!(length > 0, "chain must hold at least one key");
        let mut generated = Vec::with_capacity(length);
        generated.push(kdf::sha256(seed));
        for i in 1..length {
            let previous = generated[i - 1];
            generated.push(kdf::sha256(&previous));
        }
        // Epoch 0 uses the last generated key
        generated.reverse();
        Self {
            chain: generated,
            current_epoch: 0,
        }
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Number of keys in the chain
    pub fn chain_length(&self) -> usize {
        self.chain.len()
    }

    /// Key for the current epoch
    pub fn current_key(&self) -> [u8; 32] {
        self.chain[self.current_epoch]
    }

    /// Advance to the next epoch. Returns false once the chain is
    /// exhausted (the final key has been reached).
    pub fn advance_epoch(&mut self) -> bool {
        if self.current_epoch + 1 >= self.chain.len() {
            return false;
        }
        self.current_epoch += 1;
        true
    }

    /// First 8 bytes of the previously used key, or zeroes at epoch 0
    pub fn previous_key(&self) -> [u8; DISCLOSED_KEY_LEN] {
        if self.current_epoch == 0 {
            return [0u8; DISCLOSED_KEY_LEN];
        }
        let mut out = [0u8; DISCLOSED_KEY_LEN];
        out.copy_from_slice(&self.chain[self.current_epoch - 1][..DISCLOSED_KEY_LEN]);
        out
    }

    /// Check that a disclosed key hashes forward onto the key observed
    /// one epoch earlier. `current_key` may be truncated; only its
    /// prefix is compared.
    pub fn verify_chain(current_key: &[u8], previous_disclosed: &[u8]) -> bool {
        if current_key.is_empty() || current_key.len() > 32 {
            return false;
        }
        let digest = kdf::sha256(previous_disclosed);
        digest[..current_key.len()] == *current_key
    }
}
