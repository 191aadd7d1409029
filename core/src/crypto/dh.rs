//! X25519 key agreement with small-order point rejection
//!
//! Accepting a small-order public key lets a peer force a predictable
//! shared secret; both the membership check and the all-zero output check
//! below are required for a safe handshake.

use super::CryptoError;
use x25519_dalek::{PublicKey, StaticSecret};

/// The known X25519 small-order public keys (little-endian wire form).
///
/// Points of order 1, 2, 4 and 8 plus the twist forms with the high bit
/// set. These exact values are part of the wire contract: peers must
/// reject the same set. Comparison is against the raw received bytes,
/// without clamping.
pub const SMALL_ORDER_POINTS: [[u8; 32]; 8] = [
    // 0 (point of small order)
    [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ],
    // 1 (order 1)
    [
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
    ],
    // order 8
    [
        0xE0, 0xEB, 0x7A, 0x7C, 0x3B, 0x41, 0xB8, 0xAE, 0x16, 0x56, 0xE3, 0xFA, 0xF1, 0x9F, 0xC4,
        0x6A, 0xDA, 0x09, 0x8D, 0xEB, 0x9C, 0x32, 0xB1, 0xFD, 0x86, 0x62, 0x05, 0x16, 0x5F, 0x49,
        0xB8, 0x00,
    ],
    // order 8
    [
        0x5F, 0x9C, 0x95, 0xBC, 0xA3, 0x50, 0x8C, 0x24, 0xB1, 0xD0, 0xB1, 0x55, 0x9C, 0x83, 0xEF,
        0x5B, 0x04, 0x44, 0x5C, 0xC4, 0x58, 0x1C, 0x8E, 0x86, 0xD8, 0x22, 0x4E, 0xDD, 0xD0, 0x9F,
        0x11, 0x57,
    ],
    // p - 1 (order 2)
    [
        0xEC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, 0x7F,
    ],
    // p (reduces to 0, order 4)
    [
        0xED, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF, 0x7F,
    ],
    // twist form of the order-8 point, high bit set
    [
        0xE0, 0xEB, 0x7A, 0x7C, 0x3B, 0x41, 0xB8, 0xAE, 0x16, 0x56, 0xE3, 0xFA, 0xF1, 0x9F, 0xC4,
        0x6A, 0xDA, 0x09, 0x8D, 0xEB, 0x9C, 0x32, 0xB1, 0xFD, 0x86, 0x62, 0x05, 0x16, 0x5F, 0x49,
        0xB8, 0x80,
    ],
    // twist form of the order-8 point, high bit set
    [
        0x5F, 0x9C, 0x95, 0xBC, 0xA3, 0x50, 0x8C, 0x24, 0xB1, 0xD0, 0xB1, 0x55, 0x9C, 0x83, 0xEF,
        0x5B, 0x04, 0x44, 0x5C, 0xC4, 0x58, 0x1C, 0x8E, 0x86, 0xD8, 0x22, 0x4E, 0xDD, 0xD0, 0x9F,
        0x11, 0xD7,
    ],
];

/// Check whether `point` is in the fixed small-order set
pub fn is_small_order_point(point: &[u8; 32]) -> bool {
    SMALL_ORDER_POINTS.iter().any(|p| p == point)
}

/// Generate a fresh X25519 key pair
pub fn generate_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Diffie-Hellman against a received public key.
///
/// Rejects small-order peer keys up front and all-zero shared secrets
/// after the multiplication.
pub fn shared_secret(secret: &StaticSecret, remote: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    if is_small_order_point(remote) {
        return Err(CryptoError::InvalidKey(
            "remote X25519 key has small order".into(),
        ));
    }
    let shared = secret.diffie_hellman(&PublicKey::from(*remote));
    let bytes = *shared.as_bytes();
    if bytes == [0u8; 32] {
        return Err(CryptoError::InvalidKey(
            "X25519 shared secret is all zero".into(),
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_agrees() {
        let (alice_secret, alice_public) = generate_keypair();
        let (bob_secret, bob_public) = generate_keypair();

        let alice_shared = shared_secret(&alice_secret, bob_public.as_bytes()).unwrap();
        let bob_shared = shared_secret(&bob_secret, alice_public.as_bytes()).unwrap();
        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_all_small_order_points_rejected() {
        let (secret, _) = generate_keypair();
        for point in &SMALL_ORDER_POINTS {
            let result = shared_secret(&secret, point);
            assert!(
                matches!(result, Err(CryptoError::InvalidKey(_))),
                "point {} must be rejected",
                hex::encode(point)
            );
        }
    }

    #[test]
    fn test_small_order_set_has_eight_distinct_entries() {
        for i in 0..SMALL_ORDER_POINTS.len() {
            for j in (i + 1)..SMALL_ORDER_POINTS.len() {
                assert_ne!(SMALL_ORDER_POINTS[i], SMALL_ORDER_POINTS[j]);
            }
        }
        assert_eq!(SMALL_ORDER_POINTS.len(), 8);
    }

    #[test]
    fn test_honest_key_not_flagged() {
        let (_, public) = generate_keypair();
        assert!(!is_small_order_point(public.as_bytes()));
    }
}
