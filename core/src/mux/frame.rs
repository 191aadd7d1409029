//! Yamux frame format
//!
//! Fixed 12-byte header:
//! `Version(1) | Type(1) | Flags(2 BE) | StreamID(4 BE) | Length(4 BE)`
//!
//! `Length` is the payload size for data frames, the window delta for
//! window updates, the opaque value for pings and the reason code for
//! go-away.

use super::MuxError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Protocol version
pub const YAMUX_VERSION: u8 = 0;

/// Header size on the wire
pub const HEADER_LEN: usize = 12;

/// Largest accepted data frame payload (16 MiB)
pub const MAX_DATA_FRAME: usize = 16 * 1024 * 1024;

/// Default initial flow-control window (256 KiB)
pub const DEFAULT_WINDOW: u32 = 256 * 1024;

/// Frame flag bits
pub mod flags {
    pub const SYN: u16 = 0x1;
    pub const ACK: u16 = 0x2;
    pub const FIN: u16 = 0x4;
    pub const RST: u16 = 0x8;
}

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0,
    WindowUpdate = 1,
    Ping = 2,
    GoAway = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::WindowUpdate),
            2 => Ok(FrameType::Ping),
            3 => Ok(FrameType::GoAway),
            other => Err(MuxError::InvalidFrameType(other)),
        }
    }
}

/// Session teardown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoAwayReason {
    Normal = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl TryFrom<u32> for GoAwayReason {
    type Error = MuxError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GoAwayReason::Normal),
            1 => Ok(GoAwayReason::ProtocolError),
            2 => Ok(GoAwayReason::InternalError),
            other => Err(MuxError::InvalidGoAwayReason(other)),
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YamuxFrame {
    pub frame_type: FrameType,
    pub flags: u16,
    pub stream_id: u32,
    /// Payload length, window delta, ping opaque or go-away reason
    pub length: u32,
    /// Non-empty only for data frames
    pub payload: Vec<u8>,
}

impl YamuxFrame {
    pub fn data(stream_id: u32, flags: u16, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Data,
            flags,
            stream_id,
            length: payload.len() as u32,
            payload,
        }
    }

    pub fn window_update(stream_id: u32, flags: u16, delta: u32) -> Self {
        Self {
            frame_type: FrameType::WindowUpdate,
            flags,
            stream_id,
            length: delta,
            payload: Vec::new(),
        }
    }

    pub fn ping(flags: u16, opaque: u32) -> Self {
        Self {
            frame_type: FrameType::Ping,
            flags,
            stream_id: 0,
            length: opaque,
            payload: Vec::new(),
        }
    }

    pub fn go_away(reason: GoAwayReason) -> Self {
        Self {
            frame_type: FrameType::GoAway,
            flags: 0,
            stream_id: 0,
            length: reason as u32,
            payload: Vec::new(),
        }
    }

    pub fn rst(stream_id: u32) -> Self {
        Self::data(stream_id, flags::RST, Vec::new())
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

/// Codec for the 12-byte header plus data payloads
#[derive(Debug, Default)]
pub struct YamuxCodec;

impl Decoder for YamuxCodec {
    type Item = YamuxFrame;
    type Error = MuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = src[0];
        if version != YAMUX_VERSION {
            return Err(MuxError::InvalidVersion(version));
        }
        let frame_type = FrameType::try_from(src[1])?;
        let flags = u16::from_be_bytes([src[2], src[3]]);
        let stream_id = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let length = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);

        let payload = if frame_type == FrameType::Data {
            let payload_len = length as usize;
            if payload_len > MAX_DATA_FRAME {
                return Err(MuxError::FrameTooLarge {
                    size: payload_len,
                    max: MAX_DATA_FRAME,
                });
            }
            if src.len() < HEADER_LEN + payload_len {
                return Ok(None);
            }
            src.advance(HEADER_LEN);
            src.split_to(payload_len).to_vec()
        } else {
            src.advance(HEADER_LEN);
            Vec::new()
        };

        Ok(Some(YamuxFrame {
            frame_type,
            flags,
            stream_id,
            length,
            payload,
        }))
    }
}

impl Encoder<YamuxFrame> for YamuxCodec {
    type Error = MuxError;

    fn encode(&mut self, item: YamuxFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.frame_type == FrameType::Data && item.payload.len() > MAX_DATA_FRAME {
            return Err(MuxError::FrameTooLarge {
                size: item.payload.len(),
                max: MAX_DATA_FRAME,
            });
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(YAMUX_VERSION);
        dst.put_u8(item.frame_type as u8);
        dst.put_u16(item.flags);
        dst.put_u32(item.stream_id);
        dst.put_u32(item.length);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
