//! Retry delays for temporary accept failures.

use std::io;
use std::time::Duration;

/// First delay after a temporary accept error.
pub const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Upper bound on the accept retry delay.
pub const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ACCEPT_BACKOFF_BASE, ACCEPT_BACKOFF_MAX)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: None,
        }
    }

    /// Delay to wait before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(delay) => delay.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    /// Forget previous failures, e.g. after a successful accept.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The last delay handed out, if any failure is outstanding.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

/// Whether an accept error is worth retrying.
///
/// Aborted handshakes and descriptor or memory exhaustion clear up on their
/// own; anything else means the listener itself is unusable.
pub fn is_temporary(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            return matches!(
                code,
                libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EPROTO
            );
        }
    }

    false
}
