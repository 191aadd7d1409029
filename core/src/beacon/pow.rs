//! Micro proof-of-work for tier-1/2 beacons
//!
//! A 3-byte candidate is brute-forced so that
//! `SHA256(TruncID || Nonce || Candidate)` has at least `difficulty`
//! leading zero bits. The cost asymmetry (solver searches, verifier
//! hashes once) rate-limits beacon fabrication on cheap radios.

use crate::crypto::kdf;

/// Default puzzle difficulty in leading zero bits
pub const DEFAULT_POW_DIFFICULTY: u8 = 16;

/// Size of the brute-forced candidate in bytes
pub const POW_CANDIDATE_LEN: usize = 3;

/// Count leading zero bits of a digest, bit-exact
fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0u32;
    for &byte in digest {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

fn puzzle_digest(trunc_id: u16, nonce: u32, candidate: [u8; POW_CANDIDATE_LEN]) -> [u8; 32] {
    kdf::sha256_concat(&[&trunc_id.to_be_bytes(), &nonce.to_be_bytes(), &candidate])
}

/// Brute-force the 3-byte candidate space.
///
/// Returns the first candidate (in ascending order) whose digest clears
/// `difficulty` leading zero bits, or `None` if the space is exhausted.
/// Difficulty 0 returns the zero candidate immediately.
pub fn solve(trunc_id: u16, nonce: u32, difficulty: u8) -> Option<[u8; POW_CANDIDATE_LEN]> {
    for raw in 0u32..(1 << 24) {
        let candidate = [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8];
        if leading_zero_bits(&puzzle_digest(trunc_id, nonce, candidate)) >= difficulty as u32 {
            return Some(candidate);
        }
    }
    None
}

/// Verify a claimed candidate with a single hash
pub fn verify(
    trunc_id: u16,
    nonce: u32,
    candidate: [u8; POW_CANDIDATE_LEN],
    difficulty: u8,
) -> bool {
    leading_zero_bits(&puzzle_digest(trunc_id, nonce, candidate)) >= difficulty as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0xFF]), 16);
        assert_eq!(leading_zero_bits(&[0x00, 0x0F, 0xFF]), 12);
        assert_eq!(leading_zero_bits(&[0x80]), 0);
        assert_eq!(leading_zero_bits(&[0x01]), 7);
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x00]), 24);
    }

    #[test]
    fn test_solve_then_verify() {
        for difficulty in [0u8, 4, 8, 12] {
            let candidate = solve(0x1234, 0xAABB_CCDD, difficulty)
                .expect("small difficulties must be solvable");
            assert!(verify(0x1234, 0xAABB_CCDD, candidate, difficulty));
        }
    }

    #[test]
    fn test_difficulty_zero_accepts_everything() {
        assert!(verify(0x0000, 0, [0xFF, 0xFF, 0xFF], 0));
        assert_eq!(solve(0x0000, 0, 0), Some([0, 0, 0]));
    }

    #[test]
    fn test_perturbed_solution_fails() {
        let trunc_id = 0x5678;
        let nonce = 0x0102_0304;
        let difficulty = 12;
        let candidate = solve(trunc_id, nonce, difficulty).unwrap();

        // Flip one bit in each PoW input byte; verification must fail
        // (the puzzle could accidentally still hold, so assert on the
        // digest changing rather than universally on `verify`).
        for byte in 0..POW_CANDIDATE_LEN {
            let mut tampered = candidate;
            tampered[byte] ^= 0x01;
            assert_ne!(
                puzzle_digest(trunc_id, nonce, tampered),
                puzzle_digest(trunc_id, nonce, candidate)
            );
        }
        assert!(!verify(trunc_id.wrapping_add(1), nonce, candidate, difficulty) || {
            // A different trunc_id solving the same puzzle is possible but
            // must not preserve the digest
            puzzle_digest(trunc_id.wrapping_add(1), nonce, candidate)
                != puzzle_digest(trunc_id, nonce, candidate)
        });
    }

    #[test]
    fn test_verifier_matches_solver_digest() {
        let candidate = solve(0x0001, 7, 8).unwrap();
        let digest = puzzle_digest(0x0001, 7, candidate);
        assert!(digest[0] == 0, "8 leading zero bits means first byte zero");
    }
}
