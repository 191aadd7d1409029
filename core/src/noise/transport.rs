//! Transport mode: authenticated length-prefixed frames
//!
//! Two independent cipher states guard the two directions; reads and
//! writes proceed concurrently under separate locks, sharing only the
//! closed flag. Any parse or decryption failure poisons the connection.

use super::cipher::CipherState;
use super::NoiseError;
use crate::crypto::{LengthPrefixedCodec, PeerId};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::Decoder;

/// Maximum frame size on the wire, including the length field
pub const MAX_FRAME_SIZE: usize = 65_535;

/// Maximum plaintext per frame (authentication tag costs 16 bytes)
pub const MAX_PLAINTEXT_SIZE: usize = MAX_FRAME_SIZE - 16;

#[derive(Debug)]
struct ReadState<T> {
    io: ReadHalf<T>,
    cipher: CipherState,
    buffer: BytesMut,
}

#[derive(Debug)]
struct WriteState<T> {
    io: WriteHalf<T>,
    cipher: CipherState,
}

/// A full-duplex secured connection
#[derive(Debug)]
pub struct NoiseConnection<T> {
    reader: Mutex<ReadState<T>>,
    writer: Mutex<WriteState<T>>,
    closed: AtomicBool,
    remote_peer: PeerId,
}

impl<T> NoiseConnection<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    pub(crate) fn new(io: T, send: CipherState, recv: CipherState, remote_peer: PeerId) -> Self {
        let (read_io, write_io) = tokio::io::split(io);
        Self {
            reader: Mutex::new(ReadState {
                io: read_io,
                cipher: recv,
                buffer: BytesMut::with_capacity(4096),
            }),
            writer: Mutex::new(WriteState {
                io: write_io,
                cipher: send,
            }),
            closed: AtomicBool::new(false),
            remote_peer,
        }
    }

    /// The authenticated identity of the other side
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection closed. Blocked reads fail on their next
    /// wakeup; this never blocks.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Encrypt and send `data`, splitting it into frames of at most
    /// `MAX_PLAINTEXT_SIZE`. An empty input still produces one
    /// authenticated empty frame.
    pub async fn write(&self, data: &[u8]) -> Result<(), NoiseError> {
        if self.is_closed() {
            return Err(NoiseError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;

        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(MAX_PLAINTEXT_SIZE).collect()
        };

        for chunk in chunks {
            let ciphertext = writer.cipher.encrypt_with_ad(&[], chunk)?;
            if ciphertext.len() > MAX_FRAME_SIZE {
                return Err(NoiseError::FrameTooLarge {
                    size: ciphertext.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            writer
                .io
                .write_all(&(ciphertext.len() as u16).to_be_bytes())
                .await?;
            writer.io.write_all(&ciphertext).await?;
        }
        writer.io.flush().await?;
        Ok(())
    }

    /// Read and decrypt the next frame, returning its plaintext.
    ///
    /// On any parse or decryption error the buffer is cleared, the
    /// connection marked closed, and the error surfaced.
    pub async fn read(&self) -> Result<Vec<u8>, NoiseError> {
        if self.is_closed() {
            return Err(NoiseError::ConnectionClosed);
        }
        let mut reader = self.reader.lock().await;

        loop {
            if let Some(ciphertext) = Self::parse_frame(&mut reader.buffer) {
                match reader.cipher.decrypt_with_ad(&[], &ciphertext) {
                    Ok(plaintext) => return Ok(plaintext),
                    Err(error) => {
                        reader.buffer.clear();
                        self.close();
                        return Err(error);
                    }
                }
            }

            let mut chunk = [0u8; 4096];
            let n = reader.io.read(&mut chunk).await?;
            if n == 0 {
                self.close();
                return Err(NoiseError::ConnectionClosed);
            }
            reader.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn parse_frame(buffer: &mut BytesMut) -> Option<Vec<u8>> {
        // The length-prefixed decoder cannot fail on a u16 length
        LengthPrefixedCodec.decode(buffer).ok().flatten()
    }
}
