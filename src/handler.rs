//! Application callbacks.

use crate::conn::Conn;
use crate::error::Error;
use crate::protocol::Protocol;

/// Lifecycle and data events delivered to a [`Handler`].
///
/// For any connection, `Connected` comes first and `Closed` comes last,
/// each exactly once. `Received` events follow stream order and `Sent`
/// events follow enqueue order.
#[derive(Debug)]
pub enum Event<T> {
    /// The connection is running and accepts [`Conn::send`].
    Connected,
    /// A packet was decoded from the stream.
    Received(T),
    /// A packet was fully written to the stream.
    Sent(T),
    /// The connection has stopped. Carries the error that ended it, if any.
    Closed(Option<Error>),
}

impl<T> Event<T> {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connected => "connected",
            Event::Received(_) => "received",
            Event::Sent(_) => "sent",
            Event::Closed(_) => "closed",
        }
    }
}

/// Receives the events of every connection it is attached to.
///
/// Called synchronously from the connection's read and write tasks, so an
/// implementation must return promptly. It may call [`Conn::send`] and
/// [`Conn::stop`] on the connection it is given.
pub trait Handler<P: Protocol>: Send + Sync + 'static {
    fn on_event(&self, conn: &Conn<P>, event: Event<P::Packet>);
}
