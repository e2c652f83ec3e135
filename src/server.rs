//! TCP server built on [`Conn`].
//!
//! The server accepts streams from a [`Listener`], runs each one as a
//! connection sharing the server's handler and protocol, and keeps every
//! live connection in a registry so a stop reaches all of them.

use crate::backoff::{is_temporary, Backoff};
use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::lock;
use crate::options::Options;
use crate::protocol::Protocol;
use crate::stop::StopMode;
use slab::Slab;
use socket2::{Domain, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Source of inbound streams for [`Server::serve`].
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next inbound stream.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Server handle. Cloning is cheap; all clones control the same server.
pub struct Server<P: Protocol> {
    inner: Arc<ServerInner<P>>,
}

struct ServerInner<P: Protocol> {
    opts: Options<P>,
    /// Cancelled once by the first stop; ends the accept loop.
    stop: CancellationToken,
    /// Tracks the accept loop and every connection task.
    tracker: TaskTracker,
    shared: Mutex<Shared<P>>,
}

struct Shared<P: Protocol> {
    local_addr: Option<SocketAddr>,
    /// Live connections; `None` once the server has been stopped.
    conns: Option<Slab<Conn<P>>>,
}

impl<P: Protocol> Clone for Server<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> Server<P> {
    /// Create a server after validating `opts`.
    pub fn new(opts: Options<P>) -> Result<Self> {
        let opts = opts.validate()?;

        Ok(Self {
            inner: Arc::new(ServerInner {
                opts,
                stop: CancellationToken::new(),
                tracker: TaskTracker::new(),
                shared: Mutex::new(Shared {
                    local_addr: None,
                    conns: Some(Slab::new()),
                }),
            }),
        })
    }

    pub fn options(&self) -> &Options<P> {
        &self.inner.opts
    }

    /// Address of the listener while the server is serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.shared).local_addr
    }

    /// Number of registered, not yet closed connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.inner.shared)
            .conns
            .as_ref()
            .map_or(0, Slab::len)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Bind a TCP listener on the configured `listen` address.
    ///
    /// A bare `:port` binds every IPv4 interface.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listen = &self.inner.opts.listen;
        if listen.is_empty() {
            return Err(Error::Config("no listen address configured".to_string()));
        }

        let host_port = if listen.starts_with(':') {
            format!("0.0.0.0{listen}")
        } else {
            listen.clone()
        };

        let addr = tokio::net::lookup_host(host_port.as_str())
            .await?
            .next()
            .ok_or_else(|| Error::Config(format!("listen address '{listen}' did not resolve")))?;

        let listener = create_listener(addr, self.inner.opts.backlog)?;
        Ok(TcpListener::from_std(listener)?)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept streams from `listener` until the server is stopped.
    ///
    /// Temporary accept errors are retried with exponential backoff. Any
    /// other accept error ends the loop and is returned, unless the server
    /// is already stopping. Connections keep running after a fatal accept
    /// error until [`stop`](Self::stop) is called.
    pub async fn serve<L: Listener>(&self, mut listener: L) -> Result<()> {
        let _running = self.inner.tracker.token();
        if self.is_stopped() {
            return Ok(());
        }

        let local_addr = listener.local_addr().ok();
        lock(&self.inner.shared).local_addr = local_addr;
        info!(address = ?local_addr, "Server listening");

        let mut backoff = Backoff::default();
        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = self.inner.stop.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff.reset();
                    self.spawn_conn(stream, peer);
                }
                Err(e) if is_temporary(&e) => {
                    let delay = backoff.next_delay();
                    error!(error = %e, delay_ms = delay.as_millis() as u64, "Accept error, retrying");

                    tokio::select! {
                        biased;
                        _ = self.inner.stop.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if self.is_stopped() {
                        break Ok(());
                    }
                    error!(error = %e, "Accept failed");
                    break Err(Error::Accept(e));
                }
            }
        };

        lock(&self.inner.shared).local_addr = None;
        result
    }

    fn spawn_conn<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Conn::new(&self.inner.opts);
        conn.set_peer_addr(Some(peer));

        let Some(key) = self.register(&conn) else {
            debug!(conn = %conn.id(), peer = %peer, "Server stopped, dropping accepted stream");
            return;
        };

        let registration = Registration {
            server: self.clone(),
            key,
        };
        self.inner.tracker.spawn(async move {
            let _registration = registration;
            if let Err(e) = conn.serve(stream).await {
                debug!(conn = %conn.id(), error = %e, "Connection not served");
            }
        });
    }

    fn register(&self, conn: &Conn<P>) -> Option<usize> {
        let mut shared = lock(&self.inner.shared);
        shared.conns.as_mut().map(|conns| conns.insert(conn.clone()))
    }

    fn unregister(&self, key: usize) {
        let mut shared = lock(&self.inner.shared);
        if let Some(conns) = shared.conns.as_mut() {
            conns.try_remove(key);
        }
    }

    /// Stop accepting and stop every registered connection. Never blocks.
    ///
    /// Only the first call has an effect. Connections are stopped with
    /// `mode`, except that `GracefulWait` is handed to them as
    /// `GracefulNoWait`; await [`shutdown`](Self::shutdown) to wait for
    /// them to close.
    pub fn stop(&self, mode: StopMode) {
        let conns = {
            let mut shared = lock(&self.inner.shared);
            let Some(conns) = shared.conns.take() else {
                return;
            };
            shared.local_addr = None;
            conns
        };

        self.inner.stop.cancel();
        info!(%mode, connections = conns.len(), "Stopping server");

        let conn_mode = mode.fan_out();
        for (_, conn) in conns {
            conn.stop(conn_mode);
        }
    }

    /// Stop the server. With [`StopMode::GracefulWait`], wait until the
    /// accept loop and every connection have finished.
    pub async fn shutdown(&self, mode: StopMode) {
        self.stop(mode);
        if mode.waits() {
            self.inner.tracker.close();
            self.inner.tracker.wait().await;
            debug!("Server stopped");
        }
    }
}

/// Registry slot of a served connection, released when its task ends.
///
/// Dropping it also covers a task that unwinds.
struct Registration<P: Protocol> {
    server: Server<P>,
    key: usize,
}

impl<P: Protocol> Drop for Registration<P> {
    fn drop(&mut self) {
        self.server.unregister(self.key);
    }
}

/// Build a non-blocking listening socket with `SO_REUSEADDR` and the given
/// backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}
