// Identity key management and peer ID derivation

use super::{varint, CryptoError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// libp2p key type tag for Ed25519 public keys
const KEY_TYPE_ED25519: u64 = 1;

/// Multihash code for the identity hash
const MULTIHASH_IDENTITY: u64 = 0x00;

/// Multihash code for SHA-256
const MULTIHASH_SHA2_256: u64 = 0x12;

/// Public keys whose protobuf encoding fits under this bound are inlined
/// into the peer ID with the identity multihash instead of being hashed.
const MAX_INLINE_KEY_LEN: usize = 42;

/// Ed25519 identity key pair
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Create from seed bytes (for deterministic testing)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the verifying key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify a signature against a raw Ed25519 public key
    pub fn verify(
        public_key: &[u8; 32],
        message: &[u8],
        signature: &[u8; 64],
    ) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_bytes(public_key)
            .map_err(|_| CryptoError::InvalidKey("malformed Ed25519 public key".into()))?;
        let sig = Signature::from_bytes(signature);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Derive the peer ID for this key pair
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.signing_key.verifying_key())
    }

    /// Serialize the secret seed.
    /// Returns a `Zeroizing<Vec<u8>>` that wipes the key material on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Deserialize from a 32-byte seed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("expected 32-byte seed".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }
}

/// Protobuf-encode an Ed25519 public key the way libp2p does
///
/// `PublicKey { Type = 1 (varint), Data = 2 (bytes) }`
pub fn public_key_protobuf(public_key: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.push(0x08); // field 1, varint
    varint::encode(KEY_TYPE_ED25519, &mut out);
    out.push(0x12); // field 2, length-delimited
    varint::encode(public_key.len() as u64, &mut out);
    out.extend_from_slice(public_key);
    out
}

/// Decode a protobuf-encoded public key, returning the raw Ed25519 bytes
pub fn public_key_from_protobuf(data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key_type: Option<u64> = None;
    let mut key_bytes: Option<&[u8]> = None;
    let mut offset = 0;

    while offset < data.len() {
        let (tag, consumed) = varint::decode(&data[offset..])?;
        offset += consumed;
        let field = tag >> 3;
        let wire_type = tag & 0x07;
        match (field, wire_type) {
            (1, 0) => {
                let (value, consumed) = varint::decode(&data[offset..])?;
                offset += consumed;
                key_type = Some(value);
            }
            (2, 2) => {
                let (len, consumed) = varint::decode(&data[offset..])?;
                offset += consumed;
                let len = len as usize;
                if data.len() < offset + len {
                    return Err(CryptoError::Truncated {
                        need: offset + len,
                        got: data.len(),
                    });
                }
                key_bytes = Some(&data[offset..offset + len]);
                offset += len;
            }
            _ => {
                return Err(CryptoError::InvalidEncoding(format!(
                    "unexpected protobuf field {field} wire type {wire_type}"
                )))
            }
        }
    }

    match (key_type, key_bytes) {
        (Some(KEY_TYPE_ED25519), Some(bytes)) => bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Ed25519 key must be 32 bytes".into())),
        (Some(other), _) => Err(CryptoError::InvalidKey(format!(
            "unsupported key type {other}"
        ))),
        _ => Err(CryptoError::InvalidEncoding(
            "public key protobuf missing fields".into(),
        )),
    }
}

/// Peer identity: multihash of the protobuf-encoded public key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    bytes: Vec<u8>,
}

impl PeerId {
    /// Derive from an Ed25519 verifying key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let encoded = public_key_protobuf(&public_key.to_bytes());
        let mut bytes = Vec::with_capacity(2 + encoded.len());
        if encoded.len() <= MAX_INLINE_KEY_LEN {
            varint::encode(MULTIHASH_IDENTITY, &mut bytes);
            varint::encode(encoded.len() as u64, &mut bytes);
            bytes.extend_from_slice(&encoded);
        } else {
            let digest = super::kdf::sha256(&encoded);
            varint::encode(MULTIHASH_SHA2_256, &mut bytes);
            varint::encode(digest.len() as u64, &mut bytes);
            bytes.extend_from_slice(&digest);
        }
        Self { bytes }
    }

    /// Wrap raw multihash bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        let (code, consumed) = varint::decode(&bytes)?;
        if code != MULTIHASH_IDENTITY && code != MULTIHASH_SHA2_256 {
            return Err(CryptoError::InvalidEncoding(format!(
                "unsupported multihash code {code:#x}"
            )));
        }
        let (len, len_consumed) = varint::decode(&bytes[consumed..])?;
        let expected = consumed + len_consumed + len as usize;
        if bytes.len() != expected {
            return Err(CryptoError::Truncated {
                need: expected,
                got: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    /// Raw multihash bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Base58 rendering (the conventional peer ID text form)
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.bytes).into_string()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}
