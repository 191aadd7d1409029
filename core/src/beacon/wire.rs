//! Tiered beacon wire format
//!
//! Three frame sizes for three classes of radio budget, all big-endian:
//!
//! Tier 1 (10 B):  `Tag(1) | TruncID(2) | PoW(3) | Nonce(4)`
//! Tier 2 (32 B):  `Tag(1) | TruncID(2) | PoW(3) | Nonce(4) | MAC(4) |
//!                  PrevKey(8) | CapBloom(10)`
//! Tier 3 (var):   `Tag(1) | PeerIDLen(2) | PeerID | Nonce(4) |
//!                  EnvelopeLen(2) | Envelope`
//!
//! The tag byte is `0xD0 | tier index`; decoding masks with `0xFC`.

use super::record::{BeaconPeerRecord, Envelope, PEER_RECORD_DOMAIN};
use super::tesla::MicroTesla;
use super::{pow, BeaconError};
use crate::crypto::{kdf, KeyPair, PeerId};

/// Magic prefix shared by all tiers
pub const BEACON_TAG_PREFIX: u8 = 0xD0;

/// Exact size of a tier-1 beacon
pub const TIER1_SIZE: usize = 10;

/// Exact size of a tier-2 beacon
pub const TIER2_SIZE: usize = 32;

/// Minimum budget for a tier-3 beacon. Conservative for typical Ed25519
/// peer IDs; larger identity keys need a larger threshold.
pub const TIER3_MIN_SIZE: usize = 145;

/// Capability bloom filter width in a tier-2 beacon
pub const CAP_BLOOM_LEN: usize = 10;

/// Beacon tiers, in increasing payload budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeaconTier {
    Tier1,
    Tier2,
    Tier3,
}

impl BeaconTier {
    pub fn index(&self) -> u8 {
        match self {
            BeaconTier::Tier1 => 0,
            BeaconTier::Tier2 => 1,
            BeaconTier::Tier3 => 2,
        }
    }

    pub fn tag(&self) -> u8 {
        BEACON_TAG_PREFIX | self.index()
    }

    fn from_tag(tag: u8) -> Result<Self, BeaconError> {
        if tag & 0xFC != BEACON_TAG_PREFIX {
            return Err(BeaconError::InvalidFormat);
        }
        match tag & 0x03 {
            0 => Ok(BeaconTier::Tier1),
            1 => Ok(BeaconTier::Tier2),
            2 => Ok(BeaconTier::Tier3),
            _ => Err(BeaconError::InvalidFormat),
        }
    }
}

/// Pick the highest tier that fits the medium's beacon budget
pub fn select_tier(max_beacon_size: usize) -> Result<BeaconTier, BeaconError> {
    if max_beacon_size >= TIER3_MIN_SIZE {
        Ok(BeaconTier::Tier3)
    } else if max_beacon_size >= TIER2_SIZE {
        Ok(BeaconTier::Tier2)
    } else if max_beacon_size >= TIER1_SIZE {
        Ok(BeaconTier::Tier1)
    } else {
        Err(BeaconError::PayloadTooSmall {
            max: max_beacon_size,
            min: TIER1_SIZE,
        })
    }
}

/// Minimal anonymous presence announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier1Beacon {
    pub trunc_id: u16,
    pub pow: [u8; pow::POW_CANDIDATE_LEN],
    pub nonce: u32,
}

impl Tier1Beacon {
    /// Solve the proof-of-work and build the beacon
    pub fn new(trunc_id: u16, nonce: u32, difficulty: u8) -> Result<Self, BeaconError> {
        let pow = pow::solve(trunc_id, nonce, difficulty).ok_or_else(|| {
            BeaconError::RecordCreationFailed(format!("no PoW solution at difficulty {difficulty}"))
        })?;
        Ok(Self {
            trunc_id,
            pow,
            nonce,
        })
    }

    pub fn encode(&self) -> [u8; TIER1_SIZE] {
        let mut out = [0u8; TIER1_SIZE];
        out[0] = BeaconTier::Tier1.tag();
        out[1..3].copy_from_slice(&self.trunc_id.to_be_bytes());
        out[3..6].copy_from_slice(&self.pow);
        out[6..10].copy_from_slice(&self.nonce.to_be_bytes());
        out
    }
}

/// Presence announcement with delayed-disclosure authentication and a
/// capability sketch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier2Beacon {
    pub trunc_id: u16,
    pub pow: [u8; pow::POW_CANDIDATE_LEN],
    pub nonce: u32,
    pub mac: [u8; 4],
    pub prev_key: [u8; 8],
    pub cap_bloom: [u8; CAP_BLOOM_LEN],
}

impl Tier2Beacon {
    /// Build a beacon MACed under the current TESLA epoch key.
    ///
    /// A `cap_bloom` shorter than 10 bytes is zero-padded, longer input
    /// is truncated.
    pub fn new(
        trunc_id: u16,
        nonce: u32,
        difficulty: u8,
        tesla: &MicroTesla,
        cap_bloom: &[u8],
    ) -> Result<Self, BeaconError> {
        let pow = pow::solve(trunc_id, nonce, difficulty).ok_or_else(|| {
            BeaconError::RecordCreationFailed(format!("no PoW solution at difficulty {difficulty}"))
        })?;
        let mac = Self::compute_mac(trunc_id, pow, nonce, &tesla.current_key());

        let mut bloom = [0u8; CAP_BLOOM_LEN];
        let take = cap_bloom.len().min(CAP_BLOOM_LEN);
        bloom[..take].copy_from_slice(&cap_bloom[..take]);

        Ok(Self {
            trunc_id,
            pow,
            nonce,
            mac,
            prev_key: tesla.previous_key(),
            cap_bloom: bloom,
        })
    }

    /// HMAC-SHA256 of `TruncID || PoW || Nonce` under the epoch key,
    /// truncated to 4 bytes
    pub fn compute_mac(
        trunc_id: u16,
        pow: [u8; pow::POW_CANDIDATE_LEN],
        nonce: u32,
        epoch_key: &[u8],
    ) -> [u8; 4] {
        let mut message = Vec::with_capacity(9);
        message.extend_from_slice(&trunc_id.to_be_bytes());
        message.extend_from_slice(&pow);
        message.extend_from_slice(&nonce.to_be_bytes());
        let tag = kdf::hmac_sha256(epoch_key, &message);
        [tag[0], tag[1], tag[2], tag[3]]
    }

    /// Recompute the MAC against a disclosed epoch key
    pub fn verify_mac(&self, epoch_key: &[u8]) -> bool {
        Self::compute_mac(self.trunc_id, self.pow, self.nonce, epoch_key) == self.mac
    }

    pub fn encode(&self) -> [u8; TIER2_SIZE] {
        let mut out = [0u8; TIER2_SIZE];
        out[0] = BeaconTier::Tier2.tag();
        out[1..3].copy_from_slice(&self.trunc_id.to_be_bytes());
        out[3..6].copy_from_slice(&self.pow);
        out[6..10].copy_from_slice(&self.nonce.to_be_bytes());
        out[10..14].copy_from_slice(&self.mac);
        out[14..22].copy_from_slice(&self.prev_key);
        out[22..32].copy_from_slice(&self.cap_bloom);
        out
    }
}

/// Full identity announcement with a signed peer record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier3Beacon {
    pub peer_id: PeerId,
    pub nonce: u32,
    pub envelope: Envelope,
}

impl Tier3Beacon {
    /// Sign a peer record and wrap it. Tier 3 carries no proof-of-work;
    /// the signature itself gates fabrication.
    pub fn new(
        keys: &KeyPair,
        seq: u64,
        addresses: Vec<super::record::OpaqueAddress>,
        nonce: u32,
    ) -> Result<Self, BeaconError> {
        let record = BeaconPeerRecord {
            peer_id: keys.peer_id(),
            seq,
            addresses,
        };
        let envelope = record
            .seal(keys)
            .map_err(|e| BeaconError::RecordCreationFailed(e.to_string()))?;
        Ok(Self {
            peer_id: keys.peer_id(),
            nonce,
            envelope,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, BeaconError> {
        let peer_id = self.peer_id.as_bytes();
        let envelope = self.envelope.marshal()?;
        if peer_id.len() > u16::MAX as usize {
            return Err(BeaconError::FieldTooLong(peer_id.len()));
        }
        if envelope.len() > u16::MAX as usize {
            return Err(BeaconError::FieldTooLong(envelope.len()));
        }

        let mut out = Vec::with_capacity(9 + peer_id.len() + envelope.len());
        out.push(BeaconTier::Tier3.tag());
        out.extend_from_slice(&(peer_id.len() as u16).to_be_bytes());
        out.extend_from_slice(peer_id);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&(envelope.len() as u16).to_be_bytes());
        out.extend_from_slice(&envelope);
        Ok(out)
    }

    /// Verify the envelope and check it binds to the claimed peer ID
    pub fn verify(&self) -> Result<BeaconPeerRecord, BeaconError> {
        let payload = self.envelope.open(PEER_RECORD_DOMAIN)?;
        let record = BeaconPeerRecord::unmarshal(payload)?;
        if record.peer_id != self.peer_id {
            return Err(BeaconError::InvalidFormat);
        }
        Ok(record)
    }
}

/// A decoded beacon of any tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBeacon {
    Tier1(Tier1Beacon),
    Tier2(Tier2Beacon),
    Tier3(Tier3Beacon),
}

impl DecodedBeacon {
    pub fn tier(&self) -> BeaconTier {
        match self {
            DecodedBeacon::Tier1(_) => BeaconTier::Tier1,
            DecodedBeacon::Tier2(_) => BeaconTier::Tier2,
            DecodedBeacon::Tier3(_) => BeaconTier::Tier3,
        }
    }

    /// Truncated ID, if this tier carries one
    pub fn trunc_id(&self) -> Option<u16> {
        match self {
            DecodedBeacon::Tier1(b) => Some(b.trunc_id),
            DecodedBeacon::Tier2(b) => Some(b.trunc_id),
            DecodedBeacon::Tier3(_) => None,
        }
    }

    pub fn nonce(&self) -> u32 {
        match self {
            DecodedBeacon::Tier1(b) => b.nonce,
            DecodedBeacon::Tier2(b) => b.nonce,
            DecodedBeacon::Tier3(b) => b.nonce,
        }
    }
}

/// Decode a beacon frame of any tier
pub fn decode(data: &[u8]) -> Result<DecodedBeacon, BeaconError> {
    let tag = *data.first().ok_or(BeaconError::InvalidFormat)?;
    match BeaconTier::from_tag(tag)? {
        BeaconTier::Tier1 => {
            if data.len() != TIER1_SIZE {
                return Err(BeaconError::InvalidFormat);
            }
            Ok(DecodedBeacon::Tier1(Tier1Beacon {
                trunc_id: u16::from_be_bytes([data[1], data[2]]),
                pow: [data[3], data[4], data[5]],
                nonce: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
            }))
        }
        BeaconTier::Tier2 => {
            if data.len() != TIER2_SIZE {
                return Err(BeaconError::InvalidFormat);
            }
            let mut mac = [0u8; 4];
            mac.copy_from_slice(&data[10..14]);
            let mut prev_key = [0u8; 8];
            prev_key.copy_from_slice(&data[14..22]);
            let mut cap_bloom = [0u8; CAP_BLOOM_LEN];
            cap_bloom.copy_from_slice(&data[22..32]);
            Ok(DecodedBeacon::Tier2(Tier2Beacon {
                trunc_id: u16::from_be_bytes([data[1], data[2]]),
                pow: [data[3], data[4], data[5]],
                nonce: u32::from_be_bytes([data[6], data[7], data[8], data[9]]),
                mac,
                prev_key,
                cap_bloom,
            }))
        }
        BeaconTier::Tier3 => {
            if data.len() < 5 {
                return Err(BeaconError::InvalidFormat);
            }
            let peer_id_len = u16::from_be_bytes([data[1], data[2]]) as usize;
            let nonce_end = 3 + peer_id_len + 4;
            if data.len() < nonce_end + 2 {
                return Err(BeaconError::InvalidFormat);
            }
            let peer_id = PeerId::from_bytes(data[3..3 + peer_id_len].to_vec())
                .map_err(|_| BeaconError::InvalidFormat)?;
            let nonce = u32::from_be_bytes(
                data[3 + peer_id_len..nonce_end]
                    .try_into()
                    .map_err(|_| BeaconError::InvalidFormat)?,
            );
            let envelope_len =
                u16::from_be_bytes([data[nonce_end], data[nonce_end + 1]]) as usize;
            if data.len() != nonce_end + 2 + envelope_len {
                return Err(BeaconError::InvalidFormat);
            }
            let envelope = Envelope::unmarshal(&data[nonce_end + 2..])?;
            Ok(DecodedBeacon::Tier3(Tier3Beacon {
                peer_id,
                nonce,
                envelope,
            }))
        }
    }
}
