//! Peer record data model
//!
//! Opaque medium addresses, physical fingerprints, per-beacon
//! observations, the two sighting layers, and the signed envelope that
//! carries a `BeaconPeerRecord` inside tier-3 beacons.

use super::presence::FreshnessFunction;
use super::BeaconError;
use crate::crypto::{kdf, varint, KeyPair, PeerId};
use std::time::{Duration, SystemTime};

/// Domain separation string for beacon peer records
pub const PEER_RECORD_DOMAIN: &str = "p2p-beacon-peer-record";

/// Payload type codec for beacon peer records (multicodec bytes)
pub const PEER_RECORD_CODEC: [u8; 2] = [0x03, 0xB0];

/// Default lifetime of a confirmed record
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(600);

/// Address bytes meaningful only to the adapter that produced them
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpaqueAddress {
    /// Medium that produced the address ("ble", "wifi-direct", ...)
    pub medium_id: String,
    /// Raw address bytes, interpreted only by the originating adapter
    pub raw: Vec<u8>,
}

impl OpaqueAddress {
    pub fn new(medium_id: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            medium_id: medium_id.into(),
            raw,
        }
    }
}

/// Radio-level characteristics of a single reception
///
/// Used by the Sybil stage to cluster beacons that came from the same
/// physical emitter regardless of claimed identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalFingerprint {
    pub tx_power: i8,
    pub channel_index: u8,
    pub timing_offset_micros: i64,
    pub aoa_degrees: i16,
}

/// One accepted beacon reception
#[derive(Debug, Clone)]
pub struct BeaconObservation {
    pub timestamp: SystemTime,
    pub medium_id: String,
    pub rssi: Option<f64>,
    pub address: OpaqueAddress,
    pub freshness: FreshnessFunction,
}

/// A peer seen via tier-1/2 beacons but not yet identity-confirmed
#[derive(Debug, Clone)]
pub struct UnconfirmedSighting {
    pub trunc_id: u16,
    pub addresses: Vec<OpaqueAddress>,
    pub observations: Vec<BeaconObservation>,
    pub presence_score: f64,
}

impl UnconfirmedSighting {
    pub fn new(trunc_id: u16, observation: BeaconObservation) -> Self {
        Self {
            trunc_id,
            addresses: vec![observation.address.clone()],
            observations: vec![observation],
            presence_score: 0.0,
        }
    }
}

/// A peer confirmed through a verified tier-3 envelope
#[derive(Debug, Clone)]
pub struct ConfirmedPeerRecord {
    pub peer_id: PeerId,
    pub addresses: Vec<OpaqueAddress>,
    pub observations: Vec<BeaconObservation>,
    pub presence_score: f64,
    pub certificate: Envelope,
    pub epoch: u64,
    pub expires_at: SystemTime,
}

impl ConfirmedPeerRecord {
    /// Whether the record is still within its TTL at `now`
    pub fn is_valid(&self, now: SystemTime) -> bool {
        self.expires_at > now
    }
}

/// The signed address record carried by tier-3 beacons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconPeerRecord {
    pub peer_id: PeerId,
    pub seq: u64,
    pub addresses: Vec<OpaqueAddress>,
}

impl BeaconPeerRecord {
    /// Binary encoding: peer ID and addresses length-prefixed, `seq` as
    /// big-endian u64.
    pub fn marshal(&self) -> Result<Vec<u8>, BeaconError> {
        let mut out = Vec::new();
        write_bytes(&mut out, self.peer_id.as_bytes())?;
        out.extend_from_slice(&self.seq.to_be_bytes());
        if self.addresses.len() > u16::MAX as usize {
            return Err(BeaconError::FieldTooLong(self.addresses.len()));
        }
        out.extend_from_slice(&(self.addresses.len() as u16).to_be_bytes());
        for addr in &self.addresses {
            write_bytes(&mut out, addr.medium_id.as_bytes())?;
            write_bytes(&mut out, &addr.raw)?;
        }
        Ok(out)
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, BeaconError> {
        let mut cursor = Cursor::new(data);
        let peer_id = PeerId::from_bytes(cursor.read_bytes()?.to_vec())
            .map_err(|_| BeaconError::InvalidFormat)?;
        let seq = u64::from_be_bytes(
            cursor
                .read_exact(8)?
                .try_into()
                .map_err(|_| BeaconError::InvalidFormat)?,
        );
        let count = u16::from_be_bytes(
            cursor
                .read_exact(2)?
                .try_into()
                .map_err(|_| BeaconError::InvalidFormat)?,
        );
        let mut addresses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let medium = String::from_utf8(cursor.read_bytes()?.to_vec())
                .map_err(|_| BeaconError::InvalidFormat)?;
            let raw = cursor.read_bytes()?.to_vec();
            addresses.push(OpaqueAddress::new(medium, raw));
        }
        if !cursor.is_empty() {
            return Err(BeaconError::InvalidFormat);
        }
        Ok(Self {
            peer_id,
            seq,
            addresses,
        })
    }

    /// Seal this record into a signed envelope under the record domain
    pub fn seal(&self, keys: &KeyPair) -> Result<Envelope, BeaconError> {
        let payload = self.marshal()?;
        Envelope::seal(PEER_RECORD_DOMAIN, &PEER_RECORD_CODEC, payload, keys)
    }
}

/// Signed container binding `(domain, codec, payload)` to a public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw Ed25519 public key of the signer
    pub public_key: [u8; 32],
    /// Multicodec identifying the payload type
    pub payload_type: Vec<u8>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Envelope {
    /// Sign `payload` under `domain` with the identity key
    pub fn seal(
        domain: &str,
        payload_type: &[u8],
        payload: Vec<u8>,
        keys: &KeyPair,
    ) -> Result<Self, BeaconError> {
        let buffer = Self::signing_buffer(domain, payload_type, &payload);
        let signature = keys.sign(&buffer).to_vec();
        Ok(Self {
            public_key: keys.public_key(),
            payload_type: payload_type.to_vec(),
            payload,
            signature,
        })
    }

    /// The domain-separated byte string that is actually signed
    fn signing_buffer(domain: &str, payload_type: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        varint::encode(domain.len() as u64, &mut buffer);
        buffer.extend_from_slice(domain.as_bytes());
        varint::encode(payload_type.len() as u64, &mut buffer);
        buffer.extend_from_slice(payload_type);
        varint::encode(payload.len() as u64, &mut buffer);
        buffer.extend_from_slice(payload);
        buffer
    }

    /// Verify the signature under `domain`
    pub fn verify(&self, domain: &str) -> Result<(), BeaconError> {
        let buffer = Self::signing_buffer(domain, &self.payload_type, &self.payload);
        let signature: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| BeaconError::InvalidSignature)?;
        KeyPair::verify(&self.public_key, &buffer, &signature)
            .map_err(|_| BeaconError::InvalidSignature)
    }

    /// Verify and return the payload
    pub fn open(&self, domain: &str) -> Result<&[u8], BeaconError> {
        self.verify(domain)?;
        Ok(&self.payload)
    }

    /// Peer ID of the signer
    pub fn peer_id(&self) -> Result<PeerId, BeaconError> {
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| BeaconError::InvalidSignature)?;
        Ok(PeerId::from_public_key(&verifying))
    }

    /// Binary encoding with length-prefixed fields
    pub fn marshal(&self) -> Result<Vec<u8>, BeaconError> {
        let mut out = Vec::new();
        write_bytes(&mut out, &self.public_key)?;
        write_bytes(&mut out, &self.payload_type)?;
        write_bytes(&mut out, &self.payload)?;
        write_bytes(&mut out, &self.signature)?;
        Ok(out)
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, BeaconError> {
        let mut cursor = Cursor::new(data);
        let public_key: [u8; 32] = cursor
            .read_bytes()?
            .try_into()
            .map_err(|_| BeaconError::InvalidFormat)?;
        let payload_type = cursor.read_bytes()?.to_vec();
        let payload = cursor.read_bytes()?.to_vec();
        let signature = cursor.read_bytes()?.to_vec();
        if !cursor.is_empty() {
            return Err(BeaconError::InvalidFormat);
        }
        Ok(Self {
            public_key,
            payload_type,
            payload,
            signature,
        })
    }

    /// Stable digest of the envelope contents (for dedup and logging)
    pub fn digest(&self) -> [u8; 32] {
        kdf::sha256_concat(&[&self.public_key, &self.payload_type, &self.payload])
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), BeaconError> {
    if bytes.len() > u16::MAX as usize {
        return Err(BeaconError::FieldTooLong(bytes.len()));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], BeaconError> {
        if self.data.len() < self.offset + len {
            return Err(BeaconError::InvalidFormat);
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_bytes(&mut self) -> Result<&'a [u8], BeaconError> {
        let len = u16::from_be_bytes(
            self.read_exact(2)?
                .try_into()
                .map_err(|_| BeaconError::InvalidFormat)?,
        );
        self.read_exact(len as usize)
    }

    fn is_empty(&self) -> bool {
        self.offset == self.data.len()
    }
}
