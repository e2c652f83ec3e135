//! Connection lifecycle engine.
//!
//! A [`Conn`] owns one byte stream and runs two tasks over it: the read loop
//! decodes packets out of the accumulation buffer, the write loop serializes
//! queued packets onto the stream. Both observe the same stop signal, and
//! the serving task joins them, closes the stream and reports the closed
//! event exactly once.
//!
//! ```text
//!            send()                               Handler
//!              |                                     ^
//!              v                                     |
//!   [ bounded queue ] --> write loop --> stream --> read loop
//!                              ^                     ^
//!                              +---- stop signal ----+
//! ```

use crate::buffer::ReadBuffer;
use crate::error::{Error, ProtocolError, Result, SendError};
use crate::handler::{Event, Handler};
use crate::lock;
use crate::options::Options;
use crate::protocol::Protocol;
use crate::stop::StopMode;
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Global counter for connection ids. Only uniqueness matters.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Constructed, no stream bound yet.
    Created,
    /// Both loops are running.
    Running,
    /// Stop has been requested; loops are winding down.
    Stopping,
    /// Stream closed, loops exited, closed event delivered.
    Stopped,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnState::Created,
            1 => ConnState::Running,
            2 => ConnState::Stopping,
            _ => ConnState::Stopped,
        }
    }
}

/// Handle to one connection. Cloning is cheap; all clones share state.
pub struct Conn<P: Protocol> {
    inner: Arc<Inner<P>>,
}

struct Inner<P: Protocol> {
    id: ConnId,
    handler: Arc<dyn Handler<P>>,
    protocol: Arc<P>,
    read_buf_size: usize,
    state: AtomicU8,
    /// Gate ensuring the stop sequence is claimed once.
    stop_claimed: AtomicBool,
    stop_mode: AtomicU8,
    /// Producer side of the outbound queue; `None` once stop begins.
    sender: Mutex<Option<mpsc::Sender<P::Packet>>>,
    /// Consumer side, taken by the write loop.
    receiver: Mutex<Option<mpsc::Receiver<P::Packet>>>,
    /// Cancelled by any stop.
    stopping: CancellationToken,
    /// Cancelled only by an immediate stop; abandons in-flight writes.
    abort: CancellationToken,
    /// Cancelled after the closed event was delivered.
    stopped: CancellationToken,
    /// First fatal error, reported with the closed event.
    error: Mutex<Option<Error>>,
    peer_addr: Mutex<Option<SocketAddr>>,
}

impl<P: Protocol> Clone for Conn<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> fmt::Debug for Conn<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

impl<P: Protocol> Conn<P> {
    /// Create an idle connection. No I/O happens until [`serve`](Self::serve).
    pub fn new(opts: &Options<P>) -> Self {
        let (sender, receiver) = mpsc::channel(opts.effective_send_buf_len());

        Self {
            inner: Arc::new(Inner {
                id: ConnId::next(),
                handler: Arc::clone(&opts.handler),
                protocol: Arc::clone(&opts.protocol),
                read_buf_size: opts.read_buf_size,
                state: AtomicU8::new(ConnState::Created as u8),
                stop_claimed: AtomicBool::new(false),
                stop_mode: AtomicU8::new(0),
                sender: Mutex::new(Some(sender)),
                receiver: Mutex::new(Some(receiver)),
                stopping: CancellationToken::new(),
                abort: CancellationToken::new(),
                stopped: CancellationToken::new(),
                error: Mutex::new(None),
                peer_addr: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ConnId {
        self.inner.id
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConnState::Running
    }

    /// Remote address, when the stream was dialed or accepted over TCP.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.peer_addr)
    }

    pub(crate) fn set_peer_addr(&self, addr: Option<SocketAddr>) {
        *lock(&self.inner.peer_addr) = addr;
    }

    /// Mode of the stop that was claimed first, if any.
    pub fn stop_mode(&self) -> Option<StopMode> {
        StopMode::from_u8(self.inner.stop_mode.load(Ordering::Acquire))
    }

    /// Queue a packet for the write loop without waiting.
    ///
    /// Fails with [`SendError::Full`] when the queue is at capacity and with
    /// [`SendError::Closed`] when the connection is not running.
    pub fn send(&self, packet: P::Packet) -> Result<(), SendError<P::Packet>> {
        if !self.is_running() {
            return Err(SendError::Closed(packet));
        }

        let sender = lock(&self.inner.sender);
        let Some(tx) = sender.as_ref() else {
            return Err(SendError::Closed(packet));
        };

        tx.try_send(packet).map_err(|e| match e {
            TrySendError::Full(packet) => SendError::Full(packet),
            TrySendError::Closed(packet) => SendError::Closed(packet),
        })
    }

    /// Queue a packet, waiting for space if the queue is full.
    ///
    /// Gives up with [`SendError::Closed`] as soon as the connection starts
    /// stopping.
    pub async fn send_wait(&self, packet: P::Packet) -> Result<(), SendError<P::Packet>> {
        if !self.is_running() {
            return Err(SendError::Closed(packet));
        }

        let tx = match lock(&self.inner.sender).as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(SendError::Closed(packet)),
        };

        // Reserve before handing over the packet so a losing race with stop
        // still returns it to the caller.
        tokio::select! {
            biased;
            _ = self.inner.stopping.cancelled() => Err(SendError::Closed(packet)),
            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(packet);
                    Ok(())
                }
                Err(_) => Err(SendError::Closed(packet)),
            },
        }
    }

    /// Begin stopping the connection. Never blocks.
    ///
    /// Only the first call has an effect; later calls, whatever their mode,
    /// are ignored. Safe to call from inside [`Handler::on_event`].
    ///
    /// A draining stop writes out the queued packets, half-closes the
    /// stream and keeps delivering inbound packets until the peer closes its
    /// side. Because this never blocks, [`StopMode::GracefulWait`] passed
    /// here does not wait: use [`shutdown`](Self::shutdown) to block until
    /// the connection is closed.
    pub fn stop(&self, mode: StopMode) {
        if self
            .inner
            .stop_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.inner.stop_mode.store(mode.as_u8(), Ordering::Release);
        let prev = self
            .inner
            .state
            .swap(ConnState::Stopping as u8, Ordering::AcqRel);

        // Close the queue to new producers. Already queued packets stay
        // available to a draining write loop.
        drop(lock(&self.inner.sender).take());

        if !mode.drains() {
            self.inner.abort.cancel();
        }
        self.inner.stopping.cancel();

        trace!(conn = %self.inner.id, %mode, "stop requested");

        if ConnState::from_u8(prev) == ConnState::Created {
            // Never served: no loops, no stream, no events.
            self.inner
                .state
                .store(ConnState::Stopped as u8, Ordering::Release);
            self.inner.stopped.cancel();
        }
    }

    /// Stop the connection, waiting for it to close when `mode` is
    /// [`StopMode::GracefulWait`].
    ///
    /// A graceful wait lasts until the peer closes its side of the stream.
    pub async fn shutdown(&self, mode: StopMode) {
        self.stop(mode);
        if mode.waits() {
            self.closed().await;
        }
    }

    /// Resolves once the connection has fully stopped.
    pub async fn closed(&self) {
        self.inner.stopped.cancelled().await
    }

    /// Connect to `addr` over TCP and serve the resulting stream.
    ///
    /// A failed dial leaves the connection stopped without any events, so
    /// pending [`closed`](Self::closed) waiters are released.
    pub async fn dial_and_serve(&self, addr: &str) -> Result<()> {
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(source) => {
                if self.state() == ConnState::Created {
                    self.stop(StopMode::Immediate);
                }
                return Err(Error::Dial {
                    addr: addr.to_string(),
                    source,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(conn = %self.inner.id, error = %e, "Failed to set TCP_NODELAY");
        }
        self.set_peer_addr(stream.peer_addr().ok());

        self.serve(stream).await
    }

    /// Run the connection over `stream` until it stops.
    ///
    /// Emits [`Event::Connected`] before either loop starts and
    /// [`Event::Closed`] after both have exited and the stream is closed.
    /// Returns [`Error::NotIdle`] if the connection was already served or
    /// stopped.
    pub async fn serve<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self
            .inner
            .state
            .compare_exchange(
                ConnState::Created as u8,
                ConnState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::NotIdle);
        }

        // Release closed() waiters even if this future is dropped.
        let _stopped = self.inner.stopped.clone().drop_guard();

        let receiver = lock(&self.inner.receiver).take().ok_or(Error::NotIdle)?;

        debug!(conn = %self.inner.id, peer = ?self.peer_addr(), "Connection established");

        // Dispatched on its own task so a panicking handler is reported like
        // a panicking loop instead of unwinding through serve.
        let connected = {
            let conn = self.clone();
            tokio::spawn(async move { conn.emit(Event::Connected) })
        };
        if connected.await.is_err() {
            self.fail(Error::Panicked);
        }

        let (reader, writer) = tokio::io::split(stream);
        let read_task = tokio::spawn(self.clone().read_loop(reader));
        let write_task = tokio::spawn(self.clone().write_loop(writer, receiver));

        let reader = read_task.await;
        let writer = write_task.await;
        match (reader, writer) {
            // Dropping the reunited stream closes it.
            (Ok(reader), Ok(writer)) => drop(reader.unsplit(writer)),
            _ => self.record_error(Error::Panicked),
        }

        self.inner
            .state
            .store(ConnState::Stopped as u8, Ordering::Release);

        let error = lock(&self.inner.error).take();
        match &error {
            Some(e) => debug!(conn = %self.inner.id, error = %e, "Connection closed"),
            None => debug!(conn = %self.inner.id, "Connection closed"),
        }
        self.emit(Event::Closed(error));

        Ok(())
    }

    async fn read_loop<R>(self, mut reader: R) -> R
    where
        R: AsyncRead + Unpin,
    {
        let _guard = StopOnPanic(self.clone());
        let mut buffer = ReadBuffer::new(self.inner.read_buf_size);

        loop {
            // Draining stops keep reading until the peer closes.
            let read = tokio::select! {
                biased;
                _ = self.inner.abort.cancelled() => break,
                read = buffer.fill(&mut reader) => read,
            };

            match read {
                Ok(0) if buffer.is_empty() => {
                    trace!(conn = %self.inner.id, "Peer closed the stream");
                    self.stop(StopMode::Immediate);
                    break;
                }
                Ok(0) => {
                    self.fail(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream closed with {} bytes of a partial frame", buffer.len()),
                    )));
                    break;
                }
                Ok(_) => {
                    if let Err(e) = self.dispatch_received(&mut buffer) {
                        self.fail(e.into());
                        break;
                    }
                }
                Err(e) => {
                    self.fail(Error::Io(e));
                    break;
                }
            }
        }

        reader
    }

    /// Decode and deliver every complete frame in `buffer`.
    fn dispatch_received(&self, buffer: &mut ReadBuffer) -> Result<(), ProtocolError> {
        while !self.inner.abort.is_cancelled() {
            match buffer.decode(&*self.inner.protocol)? {
                Some(packet) => self.emit(Event::Received(packet)),
                None => break,
            }
        }
        Ok(())
    }

    async fn write_loop<W>(self, mut writer: W, mut receiver: mpsc::Receiver<P::Packet>) -> W
    where
        W: AsyncWrite + Unpin,
    {
        let _guard = StopOnPanic(self.clone());
        let mut out = BytesMut::new();

        loop {
            let packet = tokio::select! {
                biased;
                _ = self.inner.stopping.cancelled() => None,
                packet = receiver.recv() => packet,
            };
            let Some(packet) = packet else { break };

            if !self.write_packet(&mut writer, &mut out, packet).await {
                return writer;
            }
        }

        if self.inner.abort.is_cancelled() {
            return writer;
        }

        // Graceful stop: write what was queued before the stop, then
        // half-close so the peer sees end of stream.
        receiver.close();
        while let Ok(packet) = receiver.try_recv() {
            if !self.write_packet(&mut writer, &mut out, packet).await {
                return writer;
            }
        }

        tokio::select! {
            biased;
            _ = self.inner.abort.cancelled() => {}
            result = writer.shutdown() => {
                if let Err(e) = result {
                    trace!(conn = %self.inner.id, error = %e, "Shutdown of write side failed");
                }
            }
        }

        writer
    }

    /// Serialize and write one packet. Returns false when the loop must end.
    async fn write_packet<W>(&self, writer: &mut W, out: &mut BytesMut, packet: P::Packet) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        out.clear();
        out.reserve(self.inner.protocol.pack_size(&packet));
        if let Err(e) = self.inner.protocol.pack_to(&packet, out) {
            self.fail(e.into());
            return false;
        }

        let written = tokio::select! {
            biased;
            result = write_frame(writer, &out[..]) => result,
            _ = self.inner.abort.cancelled() => return false,
        };

        match written {
            Ok(()) => {
                self.emit(Event::Sent(packet));
                true
            }
            Err(e) => {
                self.fail(Error::Io(e));
                false
            }
        }
    }

    fn emit(&self, event: Event<P::Packet>) {
        trace!(conn = %self.inner.id, event = event.kind(), "Dispatching event");
        self.inner.handler.on_event(self, event);
    }

    fn record_error(&self, err: Error) {
        let mut slot = lock(&self.inner.error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Record a fatal error and stop immediately.
    fn fail(&self, err: Error) {
        trace!(conn = %self.inner.id, error = %err, "Fatal connection error");
        self.record_error(err);
        self.abort();
    }

    /// End both loops now, overriding an earlier draining stop.
    fn abort(&self) {
        self.stop(StopMode::Immediate);
        self.inner.abort.cancel();
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Stops the connection if a loop unwinds, so the other loop is not left
/// running against a half-dead connection.
struct StopOnPanic<P: Protocol>(Conn<P>);

impl<P: Protocol> Drop for StopOnPanic<P> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}
