//! Controller connection management and the stop-bit write path
//!
//! Three layers, leaves first:
//! - **link**: [`ControllerLink`] capability (open a session, write one bit).
//!   [`S7Link`] talks ISO-on-TCP to the real controller, [`SimulatedLink`]
//!   stands in for it in development mode and tests.
//! - **supervisor**: [`ConnectionSupervisor`] owns the session and the
//!   [`LinkState`] machine, reconnecting on a fixed delay forever.
//! - **gate**: [`CommandGate`] serializes stop writes against the session and
//!   turns link failures into a fault report.

pub mod gate;
pub mod link;
pub mod s7;
pub mod sim;
pub mod supervisor;
pub mod tag;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub use gate::{CommandGate, GateError, StopControl};
pub use link::{ControllerLink, LinkError};
pub use s7::{S7Link, S7Session};
pub use sim::{SimulatedLink, SimulatedSession, WriteRecord};
pub use supervisor::{ConnectionSupervisor, SessionGuard};
pub use tag::{Tag, VISION_STOP};

/// ISO-on-TCP port used by the controller. Not configurable.
pub const ISO_TCP_PORT: u16 = 102;

/// Address of the controller, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub rack: u8,
    pub slot: u8,
    pub port: u16,
}

impl Endpoint {
    /// Build an endpoint on the fixed ISO-on-TCP port
    pub fn new(host: impl Into<String>, rack: u8, slot: u8) -> Self {
        Self {
            host: host.into(),
            rack,
            slot,
            port: ISO_TCP_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (rack {}, slot {})",
            self.host, self.port, self.rack, self.slot
        )
    }
}

/// Health of the controller session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Ready,
    /// A failed session is being closed; next stop is `Disconnected`.
    Faulted,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to raise (`true`) or release (`false`) the stop bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopCommand {
    pub value: bool,
}

impl StopCommand {
    pub fn new(value: bool) -> Self {
        Self { value }
    }
}

/// Reconnection policy: fixed delay, no attempt limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between a failure and the next connection attempt
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
        }
    }
}
