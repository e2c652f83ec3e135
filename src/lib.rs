//! xtcp: a framework for framed TCP servers and clients.
//!
//! The library provides:
//! - [`Conn`]: one stream driven by a read loop and a write loop, with a
//!   bounded outbound queue and three stop modes
//! - [`Server`]: an accept loop that registers every connection and stops
//!   them together
//! - [`Protocol`]: the framing seam, with length-prefixed and line codecs
//!   in [`protocols`]
//! - [`Handler`]: application callbacks for connect, receive, send and
//!   close events

pub mod backoff;
pub mod buffer;
pub mod config;
pub mod conn;
pub mod error;
pub mod handler;
pub mod options;
pub mod protocol;
pub mod protocols;
pub mod server;
pub mod stop;

#[cfg(test)]
pub(crate) mod testing;

pub use conn::{Conn, ConnId, ConnState};
pub use error::{Error, ProtocolError, Result, SendError};
pub use handler::{Event, Handler};
pub use options::Options;
pub use protocol::{Protocol, Unpacked};
pub use server::{Listener, Server};
pub use stop::StopMode;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
///
/// Every critical section in this crate leaves its data consistent, so a
/// poisoned lock carries no broken invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
