//! Yamux connection state machine
//!
//! Three tasks per connection: a reader decoding frames and routing
//! them to streams, a writer draining the shared frame channel, and an
//! optional keep-alive loop. All of them stop promptly when the
//! connection dies or `shutdown` is called.

use super::frame::{flags, FrameType, GoAwayReason, YamuxCodec, YamuxFrame, DEFAULT_WINDOW};
use super::stream::{FailureReason, StreamShared, StreamState, YamuxStream};
use super::MuxError;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Which side of the connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YamuxMode {
    /// Initiator; opens odd stream IDs
    Client,
    /// Responder; opens even stream IDs
    Server,
}

/// Multiplexer configuration
///
/// Keep-alive checks run at interval cadence, so a dead peer is
/// detected after at most `keep_alive_interval + keep_alive_timeout`.
#[derive(Debug, Clone)]
pub struct YamuxConfig {
    pub initial_window: u32,
    pub max_concurrent_streams: usize,
    pub accept_backlog: usize,
    pub keep_alive: bool,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
}

impl Default for YamuxConfig {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_WINDOW,
            max_concurrent_streams: 256,
            accept_backlog: 32,
            keep_alive: true,
            keep_alive_interval: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(10),
        }
    }
}

struct ConnInner {
    config: YamuxConfig,
    mode: YamuxMode,
    next_stream_id: Mutex<u32>,
    streams: Mutex<HashMap<u32, Arc<StreamShared>>>,
    frame_tx: mpsc::Sender<YamuxFrame>,
    closed: AtomicBool,
    /// Go-away sent or received: no new streams either way
    closing: AtomicBool,
    pending_pings: Mutex<HashMap<u32, Instant>>,
    ping_counter: AtomicU32,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnInner {
    /// Terminal failure: fail every stream once and wake the tasks
    fn fatal(&self, reason: FailureReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let streams: Vec<_> = self.streams.lock().values().cloned().collect();
        for stream in streams {
            stream.fail(reason);
        }
        let _ = self.shutdown_tx.send(true);
    }

    fn wrong_inbound_parity(&self, stream_id: u32) -> bool {
        match self.mode {
            // We assign odd IDs, so inbound must be even
            YamuxMode::Client => stream_id % 2 == 1,
            YamuxMode::Server => stream_id % 2 == 0,
        }
    }
}

/// A multiplexed connection over any reliable byte stream
pub struct YamuxConnection {
    inner: Arc<ConnInner>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<YamuxStream>>,
}

impl YamuxConnection {
    pub fn new<T>(io: T, mode: YamuxMode, config: YamuxConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_io, write_io) = tokio::io::split(io);
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(ConnInner {
            next_stream_id: Mutex::new(match mode {
                YamuxMode::Client => 1,
                YamuxMode::Server => 2,
            }),
            mode,
            streams: Mutex::new(HashMap::new()),
            frame_tx,
            closed: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            pending_pings: Mutex::new(HashMap::new()),
            ping_counter: AtomicU32::new(0),
            shutdown_tx,
            config,
        });

        tokio::spawn(writer_task(write_io, frame_rx, inner.clone(), shutdown_rx.clone()));
        tokio::spawn(reader_task(read_io, inner.clone(), accept_tx, shutdown_rx.clone()));
        if inner.config.keep_alive {
            tokio::spawn(keep_alive_task(inner.clone(), shutdown_rx));
        }

        Self {
            inner,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn active_streams(&self) -> usize {
        self.inner.streams.lock().len()
    }

    /// Open a new outbound stream with the parity this side owns
    pub async fn open_stream(&self) -> Result<YamuxStream, MuxError> {
        if self.is_closed() {
            return Err(MuxError::ConnectionClosed);
        }
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(MuxError::GoAway);
        }
        if self.active_streams() >= self.inner.config.max_concurrent_streams {
            return Err(MuxError::MaxStreamsExceeded);
        }

        let id = {
            let mut next = self.inner.next_stream_id.lock();
            let id = *next;
            *next += 2;
            id
        };
        let shared = StreamShared::new(id, self.inner.config.initial_window);
        self.inner.streams.lock().insert(id, shared.clone());

        self.inner
            .frame_tx
            .send(YamuxFrame::window_update(id, flags::SYN, 0))
            .await
            .map_err(|_| MuxError::ConnectionClosed)?;
        Ok(YamuxStream::new(shared, self.inner.frame_tx.clone()))
    }

    /// Wait for the next inbound stream
    pub async fn accept_stream(&self) -> Result<YamuxStream, MuxError> {
        match self.accept_rx.lock().await.recv().await {
            Some(stream) => Ok(stream),
            None if self.inner.closing.load(Ordering::SeqCst) => Err(MuxError::GoAway),
            None => Err(MuxError::ConnectionClosed),
        }
    }

    /// Announce teardown. No further streams can be opened locally.
    pub async fn go_away(&self, reason: GoAwayReason) -> Result<(), MuxError> {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner
            .frame_tx
            .send(YamuxFrame::go_away(reason))
            .await
            .map_err(|_| MuxError::ConnectionClosed)
    }

    /// Tear the connection down. Blocked stream reads and writes fail;
    /// a second call is a no-op.
    pub async fn shutdown(&self) {
        if !self.is_closed() {
            let _ = self.go_away(GoAwayReason::Normal).await;
        }
        self.inner.fatal(FailureReason::ConnectionClosed);
    }
}

async fn writer_task<T>(
    write_io: WriteHalf<T>,
    mut frame_rx: mpsc::Receiver<YamuxFrame>,
    inner: Arc<ConnInner>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: AsyncRead + AsyncWrite + Send,
{
    let mut framed = FramedWrite::new(write_io, YamuxCodec);
    loop {
        tokio::select! {
            biased;
            maybe = frame_rx.recv() => match maybe {
                Some(frame) => {
                    if framed.send(frame).await.is_err() {
                        inner.fatal(FailureReason::ConnectionClosed);
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => {
                // Drain anything already queued, then stop
                while let Ok(frame) = frame_rx.try_recv() {
                    if framed.send(frame).await.is_err() {
                        break;
                    }
                }
                let _ = framed.flush().await;
                break;
            }
        }
    }
}

async fn reader_task<T>(
    read_io: ReadHalf<T>,
    inner: Arc<ConnInner>,
    accept_tx: mpsc::Sender<YamuxStream>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: AsyncRead + AsyncWrite + Send,
{
    let mut framed = FramedRead::new(read_io, YamuxCodec);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            maybe = framed.next() => match maybe {
                Some(Ok(frame)) => {
                    if !handle_frame(&inner, &accept_tx, frame).await {
                        break;
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(%error, "yamux frame decode failed");
                    inner.fatal(FailureReason::ConnectionClosed);
                    break;
                }
                None => {
                    inner.fatal(FailureReason::ConnectionClosed);
                    break;
                }
            }
        }
    }
}

/// Route one inbound frame. Returns false when the session must stop.
async fn handle_frame(
    inner: &Arc<ConnInner>,
    accept_tx: &mpsc::Sender<YamuxStream>,
    frame: YamuxFrame,
) -> bool {
    match frame.frame_type {
        FrameType::Ping => {
            if frame.has_flag(flags::ACK) {
                inner.pending_pings.lock().remove(&frame.length);
            } else {
                // Answer with a pong carrying the same opaque value
                let _ = inner
                    .frame_tx
                    .send(YamuxFrame::ping(flags::ACK, frame.length))
                    .await;
            }
            true
        }
        FrameType::GoAway => {
            match GoAwayReason::try_from(frame.length) {
                Ok(reason) => tracing::info!(?reason, "go-away received"),
                Err(_) => tracing::warn!(code = frame.length, "go-away with unknown reason"),
            }
            inner.closing.store(true, Ordering::SeqCst);
            inner.fatal(FailureReason::GoAway);
            false
        }
        FrameType::Data | FrameType::WindowUpdate => {
            handle_stream_frame(inner, accept_tx, frame).await;
            true
        }
    }
}

async fn handle_stream_frame(
    inner: &Arc<ConnInner>,
    accept_tx: &mpsc::Sender<YamuxStream>,
    frame: YamuxFrame,
) {
    let id = frame.stream_id;
    let existing = inner.streams.lock().get(&id).cloned();

    let shared = match existing {
        Some(shared) => Some(shared),
        None if frame.has_flag(flags::SYN) => accept_inbound(inner, accept_tx, id).await,
        None => {
            // Frame for a stream we do not know. Data deserves an RST so
            // the remote stops sending; stray window updates are noise.
            if frame.frame_type == FrameType::Data
                && !frame.has_flag(flags::RST)
                && !frame.payload.is_empty()
            {
                let _ = inner.frame_tx.send(YamuxFrame::rst(id)).await;
            }
            None
        }
    };
    let Some(shared) = shared else {
        return;
    };

    if frame.has_flag(flags::RST) {
        shared.remote_reset();
        inner.streams.lock().remove(&id);
        return;
    }

    match frame.frame_type {
        FrameType::Data => {
            let fin = frame.has_flag(flags::FIN);
            if shared.deliver(&frame.payload, fin).is_err() {
                tracing::warn!(stream = id, "receive window violated, resetting stream");
                shared.remote_reset();
                inner.streams.lock().remove(&id);
                let _ = inner.frame_tx.send(YamuxFrame::rst(id)).await;
                return;
            }
            if shared.inner.lock().state == StreamState::Closed {
                inner.streams.lock().remove(&id);
            }
        }
        FrameType::WindowUpdate => {
            shared.grow_send_window(frame.length);
            if frame.has_flag(flags::FIN) {
                let _ = shared.deliver(&[], true);
            }
        }
        _ => unreachable!("only stream frames reach here"),
    }
}

/// Validate and admit an inbound SYN; `None` means it was refused with
/// an RST
async fn accept_inbound(
    inner: &Arc<ConnInner>,
    accept_tx: &mpsc::Sender<YamuxStream>,
    id: u32,
) -> Option<Arc<StreamShared>> {
    let refused = id == 0
        || inner.wrong_inbound_parity(id)
        || inner.closing.load(Ordering::SeqCst)
        || inner.streams.lock().len() >= inner.config.max_concurrent_streams;
    if refused {
        tracing::debug!(stream = id, "inbound stream refused");
        let _ = inner.frame_tx.send(YamuxFrame::rst(id)).await;
        return None;
    }

    let shared = StreamShared::new(id, inner.config.initial_window);
    inner.streams.lock().insert(id, shared.clone());
    let _ = inner
        .frame_tx
        .send(YamuxFrame::window_update(id, flags::ACK, 0))
        .await;

    let handle = YamuxStream::new(shared.clone(), inner.frame_tx.clone());
    if accept_tx.try_send(handle).is_err() {
        // Accept backlog is full: refuse rather than buffer unboundedly
        inner.streams.lock().remove(&id);
        let _ = inner.frame_tx.send(YamuxFrame::rst(id)).await;
        return None;
    }
    Some(shared)
}

async fn keep_alive_task(inner: Arc<ConnInner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.config.keep_alive_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                let timeout = inner.config.keep_alive_timeout;
                let timed_out = inner
                    .pending_pings
                    .lock()
                    .values()
                    .any(|sent| sent.elapsed() > timeout);
                if timed_out {
                    tracing::warn!("keep-alive timed out, closing connection");
                    inner.fatal(FailureReason::KeepAliveTimeout);
                    break;
                }

                let opaque = inner.ping_counter.fetch_add(1, Ordering::Relaxed);
                inner.pending_pings.lock().insert(opaque, Instant::now());
                if inner.frame_tx.send(YamuxFrame::ping(0, opaque)).await.is_err() {
                    break;
                }
            }
        }
    }
}
