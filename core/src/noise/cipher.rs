//! Symmetric handshake state and transport cipher states
//!
//! The nonce is 4 zero bytes followed by the little-endian counter,
//! strictly increasing per cipher state. The counter never wraps:
//! reaching `u64::MAX` is a hard error.

use super::{NoiseError, PROTOCOL_LABEL};
use crate::crypto::{kdf, CryptoError};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// AEAD key plus a monotonically increasing nonce
#[derive(Debug, Clone)]
pub struct CipherState {
    key: Option<[u8; 32]>,
    nonce: u64,
}

impl CipherState {
    /// A state with no key yet; encrypt/decrypt pass data through
    pub fn empty() -> Self {
        Self {
            key: None,
            nonce: 0,
        }
    }

    pub fn with_key(key: [u8; 32]) -> Self {
        Self {
            key: Some(key),
            nonce: 0,
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    #[cfg(test)]
    pub(crate) fn nonce(&self) -> u64 {
        self.nonce
    }

    fn take_nonce(&mut self) -> Result<Nonce, CryptoError> {
        if self.nonce == u64::MAX {
            return Err(CryptoError::NonceOverflow);
        }
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&self.nonce.to_le_bytes());
        self.nonce += 1;
        Ok(*Nonce::from_slice(&bytes))
    }

    /// AEAD-encrypt under the current nonce. Without a key the
    /// plaintext passes through untouched and the nonce does not move.
    pub fn encrypt_with_ad(
        &mut self,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let Some(key) = self.key else {
            return Ok(plaintext.to_vec());
        };
        let nonce = self.take_nonce()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| NoiseError::Crypto(CryptoError::EncryptionFailed))
    }

    /// AEAD-decrypt under the current nonce. The nonce advances only on
    /// success, so a failed frame does not desynchronize the stream.
    pub fn decrypt_with_ad(
        &mut self,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let Some(key) = self.key else {
            return Ok(ciphertext.to_vec());
        };
        if self.nonce == u64::MAX {
            return Err(NoiseError::Crypto(CryptoError::NonceOverflow));
        }
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&self.nonce.to_le_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&bytes),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| NoiseError::Crypto(CryptoError::DecryptionFailed))?;
        self.nonce += 1;
        Ok(plaintext)
    }
}

/// Chaining key, handshake hash, and the in-handshake cipher
#[derive(Debug, Clone)]
pub struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    cipher: CipherState,
}

impl SymmetricState {
    /// Initialize from the protocol label: labels up to 32 bytes are
    /// zero-padded into `h`, longer ones hashed.
    pub fn new() -> Self {
        let label = PROTOCOL_LABEL.as_bytes();
        let h = if label.len() <= 32 {
            let mut padded = [0u8; 32];
            padded[..label.len()].copy_from_slice(label);
            padded
        } else {
            kdf::sha256(label)
        };
        let mut state = Self {
            ck: h,
            h,
            cipher: CipherState::empty(),
        };
        // Empty prologue
        state.mix_hash(&[]);
        state
    }

    pub fn handshake_hash(&self) -> [u8; 32] {
        self.h
    }

    pub fn has_key(&self) -> bool {
        self.cipher.has_key()
    }

    /// h = SHA256(h || data)
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.h = kdf::sha256_concat(&[&self.h, data]);
    }

    /// HKDF the input keying material into a new chaining key and a
    /// fresh cipher key (nonce reset)
    pub fn mix_key(&mut self, ikm: &[u8]) -> Result<(), NoiseError> {
        let mut okm = [0u8; 64];
        kdf::hkdf_sha256(Some(&self.ck), ikm, &[], &mut okm).map_err(NoiseError::Crypto)?;
        self.ck.copy_from_slice(&okm[..32]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&okm[32..]);
        self.cipher = CipherState::with_key(key);
        Ok(())
    }

    /// Encrypt (when keyed) and absorb the result into the hash
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let ciphertext = self.cipher.encrypt_with_ad(&h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypt (when keyed) and absorb the ciphertext into the hash
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let h = self.h;
        let plaintext = self.cipher.decrypt_with_ad(&h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the two transport cipher states, consuming the handshake
    /// state. Returns `(k1, k2)`; the initiator sends with k1, the
    /// responder with k2.
    pub fn split(self) -> Result<(CipherState, CipherState), NoiseError> {
        let mut okm = [0u8; 64];
        kdf::hkdf_sha256(Some(&self.ck), &[], &[], &mut okm).map_err(NoiseError::Crypto)?;
        let mut k1 = [0u8; 32];
        let mut k2 = [0u8; 32];
        k1.copy_from_slice(&okm[..32]);
        k2.copy_from_slice(&okm[32..]);
        Ok((CipherState::with_key(k1), CipherState::with_key(k2)))
    }
}

impl Default for SymmetricState {
    fn default() -> Self {
        Self::new()
    }
}
