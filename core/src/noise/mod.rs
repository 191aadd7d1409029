//! Noise XX secure channel
//!
//! `Noise_XX_25519_ChaChaPoly_SHA256` with libp2p-style identity
//! binding: each side proves ownership of its Ed25519 identity key by
//! signing its ephemeral-session X25519 static key inside the handshake
//! payload. After the third message both sides split into independent
//! transport cipher states.

pub mod cipher;
pub mod handshake;
pub mod payload;
pub mod transport;

pub use handshake::{handshake_initiator, handshake_responder};
pub use transport::NoiseConnection;

use crate::crypto::{CryptoError, PeerId};
use thiserror::Error;

/// Full protocol label mixed into the initial handshake hash
pub const PROTOCOL_LABEL: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Errors from handshaking and the secured transport
#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Peer mismatch: expected {expected}, actual {actual}")]
    PeerMismatch { expected: PeerId, actual: PeerId },
    #[error("Invalid handshake payload: {0}")]
    InvalidPayload(String),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Handshake message out of order: {0}")]
    OutOfOrder(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
