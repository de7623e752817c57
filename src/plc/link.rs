//! Controller link capability
//!
//! A link knows how to open one session to the controller and perform a
//! single bit write over it. It never retries: the supervisor decides when
//! to try again.

use async_trait::async_trait;
use std::io;

use super::{Endpoint, Tag};

/// Failures of a link operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Transport-level failure: refused, reset, closed or timed out
    #[error("Controller unreachable: {0}")]
    Unreachable(String),

    /// Handshake or encoding mismatch, or a negative acknowledgment
    #[error("Controller protocol error: {0}")]
    Protocol(String),
}

impl LinkError {
    pub fn timed_out(operation: &str) -> Self {
        Self::Unreachable(format!("{} timed out", operation))
    }
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Unreachable(err.to_string())
    }
}

/// Low-level controller capability
#[async_trait]
pub trait ControllerLink: Send + Sync {
    /// Open session state owned by the supervisor
    type Session: Send + 'static;

    /// Establish a session. Exactly one attempt, no internal retry.
    async fn open(&self, endpoint: &Endpoint) -> Result<Self::Session, LinkError>;

    /// Write one boolean to a pre-registered tag.
    ///
    /// A dropped transport surfaces as [`LinkError::Unreachable`], the same as
    /// a stale session.
    async fn write_bit(
        &self,
        session: &mut Self::Session,
        tag: &Tag,
        value: bool,
    ) -> Result<(), LinkError>;

    /// Release a session. Best effort.
    async fn close(&self, session: Self::Session) {
        drop(session);
    }
}
