//! Length-prefixed wire frames
//!
//! Wire format:
//! - 2 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! Used for Noise handshake messages and transport frames.

use super::CryptoError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest representable payload (the length field is a u16)
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Codec for 2-byte big-endian length-prefixed frames
#[derive(Debug, Default)]
pub struct LengthPrefixedCodec;

impl Decoder for LengthPrefixedCodec {
    type Item = Vec<u8>;
    type Error = CryptoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let length = u16::from_be_bytes([src[0], src[1]]) as usize;
        if src.len() < 2 + length {
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.split_to(length).to_vec()))
    }
}

impl Encoder<&[u8]> for LengthPrefixedCodec {
    type Error = CryptoError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_PAYLOAD {
            return Err(CryptoError::FrameTooLarge {
                size: item.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        dst.reserve(2 + item.len());
        dst.put_u16(item.len() as u16);
        dst.put_slice(item);
        Ok(())
    }
}

/// Encode one frame into a standalone buffer
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = BytesMut::with_capacity(2 + payload.len());
    LengthPrefixedCodec.encode(payload, &mut buf)?;
    Ok(buf.to_vec())
}
