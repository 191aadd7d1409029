//! Noise XX handshake state machine
//!
//! Message pattern:
//!   1. -> e
//!   2. <- e, ee, s, es
//!   3. -> s, se
//!
//! Message 1 still runs `encrypt_and_hash` over an empty payload for
//! wire compatibility (it mixes an empty ciphertext into the hash).
//! Each handshake message travels in a 2-byte big-endian length frame.

use super::cipher::{CipherState, SymmetricState};
use super::payload::NoiseHandshakePayload;
use super::transport::NoiseConnection;
use super::NoiseError;
use crate::crypto::{dh, KeyPair, PeerId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use x25519_dalek::{PublicKey, StaticSecret};

/// Size of an X25519 public key on the wire
const KEY_LEN: usize = 32;

/// Size of an AEAD-encrypted public key (key + tag)
const SEALED_KEY_LEN: usize = KEY_LEN + 16;

/// One side's handshake state. Consumed by `split` on completion.
struct XxState {
    symmetric: SymmetricState,
    identity: KeyPair,
    local_static: StaticSecret,
    local_static_pub: PublicKey,
    local_ephemeral: StaticSecret,
    local_ephemeral_pub: PublicKey,
    remote_static: Option<[u8; 32]>,
    remote_ephemeral: Option<[u8; 32]>,
    expected_peer: Option<PeerId>,
}

impl std::fmt::Debug for XxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XxState")
            .field("remote_static", &self.remote_static)
            .field("remote_ephemeral", &self.remote_ephemeral)
            .field("expected_peer", &self.expected_peer)
            .finish_non_exhaustive()
    }
}

impl XxState {
    fn new(identity: KeyPair, expected_peer: Option<PeerId>) -> Self {
        let (local_static, local_static_pub) = dh::generate_keypair();
        let (local_ephemeral, local_ephemeral_pub) = dh::generate_keypair();
        Self {
            symmetric: SymmetricState::new(),
            identity,
            local_static,
            local_static_pub,
            local_ephemeral,
            local_ephemeral_pub,
            remote_static: None,
            remote_ephemeral: None,
            expected_peer,
        }
    }

    /// -> e
    fn write_message_1(&mut self) -> Result<Vec<u8>, NoiseError> {
        let e_pub = self.local_ephemeral_pub.to_bytes();
        self.symmetric.mix_hash(&e_pub);
        let mut message = e_pub.to_vec();
        // No key yet: this only mixes an empty ciphertext into h
        message.extend_from_slice(&self.symmetric.encrypt_and_hash(&[])?);
        Ok(message)
    }

    fn read_message_1(&mut self, message: &[u8]) -> Result<(), NoiseError> {
        if message.len() < KEY_LEN {
            return Err(NoiseError::HandshakeFailed("message 1 too short".into()));
        }
        let e: [u8; 32] = message[..KEY_LEN].try_into().expect("length checked");
        self.symmetric.mix_hash(&e);
        self.remote_ephemeral = Some(e);
        self.symmetric.decrypt_and_hash(&message[KEY_LEN..])?;
        Ok(())
    }

    /// <- e, ee, s, es
    fn write_message_2(&mut self) -> Result<Vec<u8>, NoiseError> {
        let re = self
            .remote_ephemeral
            .ok_or(NoiseError::OutOfOrder("message 2 before message 1"))?;

        let e_pub = self.local_ephemeral_pub.to_bytes();
        self.symmetric.mix_hash(&e_pub);
        let ee = dh::shared_secret(&self.local_ephemeral, &re)?;
        self.symmetric.mix_key(&ee)?;

        let sealed_static = self
            .symmetric
            .encrypt_and_hash(&self.local_static_pub.to_bytes())?;
        let es = dh::shared_secret(&self.local_static, &re)?;
        self.symmetric.mix_key(&es)?;

        let payload =
            NoiseHandshakePayload::sign(&self.identity, &self.local_static_pub.to_bytes());
        let sealed_payload = self.symmetric.encrypt_and_hash(&payload.encode())?;

        let mut message = e_pub.to_vec();
        message.extend_from_slice(&sealed_static);
        message.extend_from_slice(&sealed_payload);
        Ok(message)
    }

    fn read_message_2(&mut self, message: &[u8]) -> Result<PeerId, NoiseError> {
        if message.len() < KEY_LEN + SEALED_KEY_LEN {
            return Err(NoiseError::HandshakeFailed("message 2 too short".into()));
        }
        let re: [u8; 32] = message[..KEY_LEN].try_into().expect("length checked");
        self.symmetric.mix_hash(&re);
        self.remote_ephemeral = Some(re);
        let ee = dh::shared_secret(&self.local_ephemeral, &re)?;
        self.symmetric.mix_key(&ee)?;

        let sealed_static = &message[KEY_LEN..KEY_LEN + SEALED_KEY_LEN];
        let rs: [u8; 32] = self
            .symmetric
            .decrypt_and_hash(sealed_static)?
            .as_slice()
            .try_into()
            .map_err(|_| NoiseError::HandshakeFailed("static key length".into()))?;
        self.remote_static = Some(rs);
        let es = dh::shared_secret(&self.local_ephemeral, &rs)?;
        self.symmetric.mix_key(&es)?;

        let payload_bytes = self
            .symmetric
            .decrypt_and_hash(&message[KEY_LEN + SEALED_KEY_LEN..])?;
        let payload = NoiseHandshakePayload::decode(&payload_bytes)?;
        payload.verify(&rs, self.expected_peer.as_ref())
    }

    /// -> s, se
    fn write_message_3(&mut self) -> Result<Vec<u8>, NoiseError> {
        let re = self
            .remote_ephemeral
            .ok_or(NoiseError::OutOfOrder("message 3 before message 2"))?;

        let sealed_static = self
            .symmetric
            .encrypt_and_hash(&self.local_static_pub.to_bytes())?;
        let se = dh::shared_secret(&self.local_static, &re)?;
        self.symmetric.mix_key(&se)?;

        let payload =
            NoiseHandshakePayload::sign(&self.identity, &self.local_static_pub.to_bytes());
        let sealed_payload = self.symmetric.encrypt_and_hash(&payload.encode())?;

        let mut message = sealed_static;
        message.extend_from_slice(&sealed_payload);
        Ok(message)
    }

    fn read_message_3(&mut self, message: &[u8]) -> Result<PeerId, NoiseError> {
        if self.remote_ephemeral.is_none() {
            return Err(NoiseError::OutOfOrder("message 3 before message 1"));
        }
        if message.len() < SEALED_KEY_LEN {
            return Err(NoiseError::HandshakeFailed("message 3 too short".into()));
        }
        let rs: [u8; 32] = self
            .symmetric
            .decrypt_and_hash(&message[..SEALED_KEY_LEN])?
            .as_slice()
            .try_into()
            .map_err(|_| NoiseError::HandshakeFailed("static key length".into()))?;
        self.remote_static = Some(rs);
        let se = dh::shared_secret(&self.local_ephemeral, &rs)?;
        self.symmetric.mix_key(&se)?;

        let payload_bytes = self.symmetric.decrypt_and_hash(&message[SEALED_KEY_LEN..])?;
        let payload = NoiseHandshakePayload::decode(&payload_bytes)?;
        payload.verify(&rs, self.expected_peer.as_ref())
    }

    /// Consume the state into the two transport cipher states
    fn split(self, initiator: bool) -> Result<(CipherState, CipherState), NoiseError> {
        debug_assert!(
            self.remote_static.is_some() && self.remote_ephemeral.is_some(),
            "split before the pattern completed"
        );
        let (k1, k2) = self.symmetric.split()?;
        // Initiator sends with k1; responder swaps
        Ok(if initiator { (k1, k2) } else { (k2, k1) })
    }
}

async fn write_frame<T: AsyncWrite + Unpin>(io: &mut T, payload: &[u8]) -> Result<(), NoiseError> {
    let frame = crate::crypto::framing::encode_frame(payload)?;
    io.write_all(&frame).await?;
    io.flush().await?;
    Ok(())
}

async fn read_frame<T: AsyncRead + Unpin>(io: &mut T) -> Result<Vec<u8>, NoiseError> {
    let mut length = [0u8; 2];
    io.read_exact(&mut length).await?;
    let mut payload = vec![0u8; u16::from_be_bytes(length) as usize];
    io.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Drive the initiator half of the handshake over `io`.
///
/// On success the handshake state is consumed and the connection owns
/// both transport cipher states.
pub async fn handshake_initiator<T>(
    mut io: T,
    identity: &KeyPair,
    expected_peer: Option<PeerId>,
) -> Result<NoiseConnection<T>, NoiseError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut state = XxState::new(identity.clone(), expected_peer);

    let message_1 = state.write_message_1()?;
    write_frame(&mut io, &message_1).await?;

    let message_2 = read_frame(&mut io).await?;
    let remote_peer = state.read_message_2(&message_2)?;

    let message_3 = state.write_message_3()?;
    write_frame(&mut io, &message_3).await?;

    let (send, recv) = state.split(true)?;
    tracing::debug!(peer = %remote_peer, "noise handshake complete (initiator)");
    Ok(NoiseConnection::new(io, send, recv, remote_peer))
}

/// Drive the responder half of the handshake over `io`
pub async fn handshake_responder<T>(
    mut io: T,
    identity: &KeyPair,
    expected_peer: Option<PeerId>,
) -> Result<NoiseConnection<T>, NoiseError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut state = XxState::new(identity.clone(), expected_peer);

    let message_1 = read_frame(&mut io).await?;
    state.read_message_1(&message_1)?;

    let message_2 = state.write_message_2()?;
    write_frame(&mut io, &message_2).await?;

    let message_3 = read_frame(&mut io).await?;
    let remote_peer = state.read_message_3(&message_3)?;

    let (send, recv) = state.split(false)?;
    tracing::debug!(peer = %remote_peer, "noise handshake complete (responder)");
    Ok(NoiseConnection::new(io, send, recv, remote_peer))
}
