//! Stream state and flow control
//!
//! Each stream carries its own receive and send windows. Writes block
//! while the send window is exhausted and resume on window updates;
//! incoming data that overruns the receive window is a protocol
//! violation handled by the connection (RST).

use super::frame::{flags, YamuxFrame};
use super::MuxError;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Stream lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// We sent FIN; reads may continue
    HalfClosedLocal,
    /// Remote sent FIN; writes may continue
    HalfClosedRemote,
    Closed,
}

/// Why a stream stopped working out-of-band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureReason {
    Reset,
    GoAway,
    ConnectionClosed,
    KeepAliveTimeout,
}

impl FailureReason {
    fn to_error(self) -> MuxError {
        match self {
            FailureReason::Reset => MuxError::StreamReset,
            FailureReason::GoAway => MuxError::GoAway,
            FailureReason::ConnectionClosed => MuxError::ConnectionClosed,
            FailureReason::KeepAliveTimeout => MuxError::KeepAliveTimeout,
        }
    }
}

pub(crate) struct StreamInner {
    pub state: StreamState,
    pub send_window: u32,
    pub recv_window: u32,
    pub buffer: BytesMut,
    pub failure: Option<FailureReason>,
}

/// State shared between the user-facing handle and the connection
/// driver
pub(crate) struct StreamShared {
    pub id: u32,
    pub inner: Mutex<StreamInner>,
    pub readable: Notify,
    pub writable: Notify,
}

impl StreamShared {
    pub fn new(id: u32, initial_window: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(StreamInner {
                state: StreamState::Open,
                send_window: initial_window,
                recv_window: initial_window,
                buffer: BytesMut::new(),
                failure: None,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    fn wake_readers(&self) {
        self.readable.notify_waiters();
        self.readable.notify_one();
    }

    fn wake_writers(&self) {
        self.writable.notify_waiters();
        self.writable.notify_one();
    }

    /// Driver: deliver incoming payload. `Err` means the receive window
    /// was violated and the stream must be reset.
    pub fn deliver(&self, payload: &[u8], fin: bool) -> Result<(), ()> {
        let mut inner = self.inner.lock();
        if inner.failure.is_some() {
            return Ok(());
        }
        if payload.len() as u64 > inner.recv_window as u64 {
            return Err(());
        }
        inner.recv_window -= payload.len() as u32;
        inner.buffer.put_slice(payload);
        if fin {
            inner.state = match inner.state {
                StreamState::Open | StreamState::HalfClosedRemote => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal | StreamState::Closed => StreamState::Closed,
            };
        }
        drop(inner);
        self.wake_readers();
        Ok(())
    }

    /// Driver: apply a window update. Saturates at `u32::MAX`.
    pub fn grow_send_window(&self, delta: u32) {
        let mut inner = self.inner.lock();
        inner.send_window = inner.send_window.saturating_add(delta);
        drop(inner);
        self.wake_writers();
    }

    /// Driver: remote RST hard-terminates the stream
    pub fn remote_reset(&self) {
        self.fail(FailureReason::Reset);
    }

    /// Driver: fail the stream out-of-band (connection death, go-away)
    pub fn fail(&self, reason: FailureReason) {
        let mut inner = self.inner.lock();
        if inner.failure.is_none() {
            inner.failure = Some(reason);
        }
        drop(inner);
        self.wake_readers();
        self.wake_writers();
    }
}

/// User-facing stream handle
pub struct YamuxStream {
    shared: Arc<StreamShared>,
    frame_tx: mpsc::Sender<YamuxFrame>,
}

impl YamuxStream {
    pub(crate) fn new(shared: Arc<StreamShared>, frame_tx: mpsc::Sender<YamuxFrame>) -> Self {
        Self { shared, frame_tx }
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        self.shared.inner.lock().state
    }

    /// Read available bytes. `Ok(None)` signals a clean end-of-stream
    /// after the remote's FIN.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, MuxError> {
        loop {
            let notified = self.shared.readable.notified();
            let ready = {
                let mut inner = self.shared.inner.lock();
                if !inner.buffer.is_empty() {
                    let data = inner.buffer.split().to_vec();
                    // Replenish the receive window by what was consumed
                    inner.recv_window = inner.recv_window.saturating_add(data.len() as u32);
                    Some(Ok(Some(data)))
                } else if let Some(reason) = inner.failure {
                    Some(Err(reason.to_error()))
                } else if matches!(
                    inner.state,
                    StreamState::HalfClosedRemote | StreamState::Closed
                ) {
                    Some(Ok(None))
                } else {
                    None
                }
            };

            match ready {
                Some(Ok(Some(data))) => {
                    // Tell the remote it may send this much again. A dead
                    // connection is surfaced by the next read, not here.
                    let _ = self
                        .frame_tx
                        .send(YamuxFrame::window_update(
                            self.shared.id,
                            0,
                            data.len() as u32,
                        ))
                        .await;
                    return Ok(Some(data));
                }
                Some(other) => return other,
                None => notified.await,
            }
        }
    }

    /// Write all of `data`, blocking while the send window is exhausted
    /// and splitting across frames as the window allows
    pub async fn write(&self, data: &[u8]) -> Result<(), MuxError> {
        let mut offset = 0;
        while offset < data.len() {
            let notified = self.shared.writable.notified();
            let take = {
                let mut inner = self.shared.inner.lock();
                if let Some(reason) = inner.failure {
                    return Err(reason.to_error());
                }
                if matches!(
                    inner.state,
                    StreamState::HalfClosedLocal | StreamState::Closed
                ) {
                    return Err(MuxError::StreamClosed);
                }
                let take = (inner.send_window as usize).min(data.len() - offset);
                inner.send_window -= take as u32;
                take
            };

            if take == 0 {
                notified.await;
                continue;
            }
            self.frame_tx
                .send(YamuxFrame::data(
                    self.shared.id,
                    0,
                    data[offset..offset + take].to_vec(),
                ))
                .await
                .map_err(|_| MuxError::ConnectionClosed)?;
            offset += take;
        }
        Ok(())
    }

    /// Send FIN; reads stay open until the remote closes its half
    pub async fn close(&self) -> Result<(), MuxError> {
        {
            let mut inner = self.shared.inner.lock();
            if let Some(reason) = inner.failure {
                return Err(reason.to_error());
            }
            match inner.state {
                StreamState::HalfClosedLocal | StreamState::Closed => return Ok(()),
                StreamState::Open => inner.state = StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => inner.state = StreamState::Closed,
            }
        }
        self.frame_tx
            .send(YamuxFrame::data(self.shared.id, flags::FIN, Vec::new()))
            .await
            .map_err(|_| MuxError::ConnectionClosed)
    }

    /// Send RST and terminate the stream locally
    pub async fn reset(&self) -> Result<(), MuxError> {
        self.shared.remote_reset();
        self.frame_tx
            .send(YamuxFrame::rst(self.shared.id))
            .await
            .map_err(|_| MuxError::ConnectionClosed)
    }
}
