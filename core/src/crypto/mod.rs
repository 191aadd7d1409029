//! Cryptographic primitives shared by every protocol engine
//!
//! Hashing and key derivation, Ed25519 identity keys with peer ID
//! derivation, X25519 agreement with small-order validation, and the
//! low-level wire codecs (varints, length-prefixed frames).

pub mod dh;
pub mod framing;
pub mod kdf;
pub mod keys;
pub mod varint;

pub use dh::{is_small_order_point, shared_secret, SMALL_ORDER_POINTS};
pub use framing::LengthPrefixedCodec;
pub use keys::{KeyPair, PeerId};

use thiserror::Error;

/// Errors from the crypto layer
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Nonce overflow")]
    NonceOverflow,
    #[error("Varint overflow")]
    VarintOverflow,
    #[error("Truncated input: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
