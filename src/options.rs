//! Options shared by connections and servers.

use crate::buffer::DEFAULT_READ_CHUNK;
use crate::error::Error;
use crate::handler::Handler;
use crate::protocol::Protocol;
use std::fmt;
use std::sync::Arc;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_SEND_BUF_LEN: usize = 128;

/// Default listen backlog used by [`Server::listen_and_serve`](crate::Server::listen_and_serve).
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Configuration for a [`Conn`](crate::Conn) or [`Server`](crate::Server).
///
/// Handler and protocol are shared by every connection built from these
/// options.
pub struct Options<P: Protocol> {
    /// Address to bind to (e.g. `127.0.0.1:9000`). Only used by
    /// `listen_and_serve`; may be empty otherwise.
    pub listen: String,
    pub handler: Arc<dyn Handler<P>>,
    pub protocol: Arc<P>,
    /// Outbound queue capacity per connection (0 means the default).
    pub send_buf_len: usize,
    /// Bytes requested from the stream per read.
    pub read_buf_size: usize,
    /// Pending-connection backlog for the listening socket.
    pub backlog: u32,
}

impl<P: Protocol> Options<P> {
    pub fn new(handler: impl Handler<P>, protocol: P) -> Self {
        Self::from_shared(Arc::new(handler), Arc::new(protocol))
    }

    /// Build options around a handler and protocol that are already shared.
    pub fn from_shared(handler: Arc<dyn Handler<P>>, protocol: Arc<P>) -> Self {
        Self {
            listen: String::new(),
            handler,
            protocol,
            send_buf_len: DEFAULT_SEND_BUF_LEN,
            read_buf_size: DEFAULT_READ_CHUNK,
            backlog: DEFAULT_BACKLOG,
        }
    }

    pub fn with_listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn with_send_buf_len(mut self, len: usize) -> Self {
        self.send_buf_len = len;
        self
    }

    pub fn with_read_buf_size(mut self, size: usize) -> Self {
        self.read_buf_size = size;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Outbound queue capacity with the default applied.
    pub fn effective_send_buf_len(&self) -> usize {
        if self.send_buf_len == 0 {
            DEFAULT_SEND_BUF_LEN
        } else {
            self.send_buf_len
        }
    }

    /// Check the options and fill in defaults.
    pub(crate) fn validate(mut self) -> Result<Self, Error> {
        self.send_buf_len = self.effective_send_buf_len();

        if self.read_buf_size == 0 {
            return Err(Error::Config("read_buf_size must be positive".to_string()));
        }
        if self.backlog == 0 {
            return Err(Error::Config("backlog must be positive".to_string()));
        }
        validate_listen(&self.listen)?;

        Ok(self)
    }
}

impl<P: Protocol> Clone for Options<P> {
    fn clone(&self) -> Self {
        Self {
            listen: self.listen.clone(),
            handler: Arc::clone(&self.handler),
            protocol: Arc::clone(&self.protocol),
            send_buf_len: self.send_buf_len,
            read_buf_size: self.read_buf_size,
            backlog: self.backlog,
        }
    }
}

impl<P: Protocol> fmt::Debug for Options<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("listen", &self.listen)
            .field("send_buf_len", &self.send_buf_len)
            .field("read_buf_size", &self.read_buf_size)
            .field("backlog", &self.backlog)
            .finish_non_exhaustive()
    }
}

/// Accepts `host:port`, `[v6]:port` and `:port`; empty means "not set".
fn validate_listen(addr: &str) -> Result<(), Error> {
    if addr.is_empty() {
        return Ok(());
    }

    let (_, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("listen address '{addr}' has no port")))?;

    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| Error::Config(format!("listen address '{addr}' has an invalid port")))
}
