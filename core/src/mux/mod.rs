//! Yamux stream multiplexer
//!
//! Many lightweight bidirectional streams over one reliable connection:
//! 12-byte binary headers, per-stream flow-control windows, keep-alive
//! pings, and a go-away teardown path. The initiator opens odd stream
//! IDs, the responder even; ID 0 belongs to the session itself.

pub mod connection;
pub mod frame;
pub mod stream;

pub use connection::{YamuxConfig, YamuxConnection, YamuxMode};
pub use frame::{FrameType, GoAwayReason, YamuxFrame};
pub use stream::YamuxStream;

use thiserror::Error;

/// Multiplexer errors
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Stream was reset by the remote")]
    StreamReset,
    #[error("Stream is closed for writing")]
    StreamClosed,
    #[error("Session received go-away")]
    GoAway,
    #[error("Keep-alive timed out")]
    KeepAliveTimeout,
    #[error("Maximum concurrent streams reached")]
    MaxStreamsExceeded,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Invalid frame version {0}")]
    InvalidVersion(u8),
    #[error("Invalid frame type {0}")]
    InvalidFrameType(u8),
    #[error("Invalid go-away reason {0}")]
    InvalidGoAwayReason(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
