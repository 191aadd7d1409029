//! Handshake payload with libp2p identity binding
//!
//! Protobuf wire format, field tags 1..3, all length-delimited:
//! `identity_key` (protobuf-encoded public key), `identity_sig`
//! (Ed25519 signature over the prefixed Noise static key), optional
//! `data`.

use super::NoiseError;
use crate::crypto::keys::{public_key_from_protobuf, public_key_protobuf};
use crate::crypto::{varint, KeyPair, PeerId};
use ed25519_dalek::VerifyingKey;

/// Domain prefix for the identity signature
pub const IDENTITY_SIG_PREFIX: &[u8] = b"noise-libp2p-static-key:";

/// The payload carried inside handshake messages 2 and 3
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoiseHandshakePayload {
    /// Protobuf-encoded libp2p public key
    pub identity_key: Vec<u8>,
    /// Signature over `IDENTITY_SIG_PREFIX || noise static public key`
    pub identity_sig: Vec<u8>,
    /// Optional application data
    pub data: Vec<u8>,
}

impl NoiseHandshakePayload {
    /// Build and sign a payload binding `static_pub` to the identity
    pub fn sign(identity: &KeyPair, static_pub: &[u8; 32]) -> Self {
        let mut message = Vec::with_capacity(IDENTITY_SIG_PREFIX.len() + 32);
        message.extend_from_slice(IDENTITY_SIG_PREFIX);
        message.extend_from_slice(static_pub);
        Self {
            identity_key: public_key_protobuf(&identity.public_key()),
            identity_sig: identity.sign(&message).to_vec(),
            data: Vec::new(),
        }
    }

    /// Verify the signature against the remote's Noise static key and
    /// recover the remote peer ID. Fails with `PeerMismatch` when an
    /// expected peer is given and the identity differs.
    pub fn verify(
        &self,
        remote_static_pub: &[u8; 32],
        expected_peer: Option<&PeerId>,
    ) -> Result<PeerId, NoiseError> {
        let identity_pub = public_key_from_protobuf(&self.identity_key)
            .map_err(|e| NoiseError::InvalidPayload(e.to_string()))?;
        let verifying = VerifyingKey::from_bytes(&identity_pub)
            .map_err(|_| NoiseError::InvalidPayload("malformed identity key".into()))?;
        let actual = PeerId::from_public_key(&verifying);

        let mut message = Vec::with_capacity(IDENTITY_SIG_PREFIX.len() + 32);
        message.extend_from_slice(IDENTITY_SIG_PREFIX);
        message.extend_from_slice(remote_static_pub);

        let signature: [u8; 64] = self
            .identity_sig
            .as_slice()
            .try_into()
            .map_err(|_| NoiseError::InvalidPayload("signature must be 64 bytes".into()))?;
        KeyPair::verify(&identity_pub, &message, &signature)
            .map_err(|_| NoiseError::HandshakeFailed("identity signature invalid".into()))?;

        if let Some(expected) = expected_peer {
            if *expected != actual {
                return Err(NoiseError::PeerMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(actual)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_bytes_field(&mut out, 1, &self.identity_key);
        encode_bytes_field(&mut out, 2, &self.identity_sig);
        if !self.data.is_empty() {
            encode_bytes_field(&mut out, 3, &self.data);
        }
        out
    }

    pub fn decode(input: &[u8]) -> Result<Self, NoiseError> {
        let mut payload = Self::default();
        let mut offset = 0;
        while offset < input.len() {
            let (tag, consumed) = varint::decode(&input[offset..])
                .map_err(|e| NoiseError::InvalidPayload(e.to_string()))?;
            offset += consumed;
            let field = tag >> 3;
            let wire_type = tag & 0x07;
            if wire_type != 2 {
                return Err(NoiseError::InvalidPayload(format!(
                    "field {field} has unsupported wire type {wire_type}"
                )));
            }
            let (len, consumed) = varint::decode(&input[offset..])
                .map_err(|e| NoiseError::InvalidPayload(e.to_string()))?;
            offset += consumed;
            let len = len as usize;
            if input.len() < offset + len {
                return Err(NoiseError::InvalidPayload("truncated field".into()));
            }
            let value = input[offset..offset + len].to_vec();
            offset += len;
            match field {
                1 => payload.identity_key = value,
                2 => payload.identity_sig = value,
                3 => payload.data = value,
                other => {
                    return Err(NoiseError::InvalidPayload(format!(
                        "unknown field tag {other}"
                    )))
                }
            }
        }
        Ok(payload)
    }
}

fn encode_bytes_field(out: &mut Vec<u8>, field: u64, value: &[u8]) {
    varint::encode(field << 3 | 2, out);
    varint::encode(value.len() as u64, out);
    out.extend_from_slice(value);
}
