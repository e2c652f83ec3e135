//! Shutdown modes shared by connections and servers.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How a connection (or every connection of a server) is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Close the stream at once; queued outbound packets are discarded.
    Immediate,
    /// Stop taking new work, drain queued packets, then half-close. Inbound
    /// packets are still delivered until the peer closes. The caller does
    /// not wait.
    GracefulNoWait,
    /// Like `GracefulNoWait`, but `shutdown` waits until everything has
    /// closed. Plain `stop` calls never block, so there it acts exactly
    /// like `GracefulNoWait`.
    #[default]
    GracefulWait,
}

impl StopMode {
    /// Whether queued outbound packets are written before closing.
    pub fn drains(self) -> bool {
        !matches!(self, StopMode::Immediate)
    }

    /// Whether `shutdown` blocks until termination.
    pub fn waits(self) -> bool {
        matches!(self, StopMode::GracefulWait)
    }

    /// Mode handed to each connection when a server stops.
    ///
    /// A waiting server stop waits once on all of its tasks instead of on
    /// each connection in turn.
    pub fn fan_out(self) -> StopMode {
        match self {
            StopMode::GracefulWait => StopMode::GracefulNoWait,
            other => other,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            StopMode::Immediate => 1,
            StopMode::GracefulNoWait => 2,
            StopMode::GracefulWait => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<StopMode> {
        match value {
            1 => Some(StopMode::Immediate),
            2 => Some(StopMode::GracefulNoWait),
            3 => Some(StopMode::GracefulWait),
            _ => None,
        }
    }
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopMode::Immediate => "immediate",
            StopMode::GracefulNoWait => "graceful_no_wait",
            StopMode::GracefulWait => "graceful_wait",
        })
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "immediate" => Ok(StopMode::Immediate),
            "graceful_no_wait" => Ok(StopMode::GracefulNoWait),
            "graceful_wait" | "graceful" => Ok(StopMode::GracefulWait),
            other => Err(format!(
                "unknown stop mode '{other}' (expected immediate, graceful_no_wait or graceful_wait)"
            )),
        }
    }
}
