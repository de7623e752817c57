//! Stop command gate
//!
//! The only write path to the controller. Writes are refused immediately
//! unless the link is `Ready`, run one at a time in arrival order, and any
//! link failure faults the session so the supervisor reconnects. There is no
//! retry here: a failed write is reported to the caller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::link::{ControllerLink, LinkError};
use super::supervisor::{ConnectionSupervisor, SessionGuard};
use super::{Endpoint, LinkState, RetryPolicy, StopCommand, Tag, VISION_STOP};

/// Why a stop write did not happen
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The link was not `Ready`; no I/O was attempted
    #[error("controller link not ready")]
    NotReady,

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Serialized writer of the stop bit
pub struct CommandGate<L: ControllerLink> {
    supervisor: Arc<ConnectionSupervisor<L>>,
    tag: Tag,
}

impl<L: ControllerLink + 'static> CommandGate<L> {
    /// Gate writing the [`VISION_STOP`] tag
    pub fn new(supervisor: Arc<ConnectionSupervisor<L>>) -> Self {
        Self::with_tag(supervisor, VISION_STOP)
    }

    pub fn with_tag(supervisor: Arc<ConnectionSupervisor<L>>, tag: Tag) -> Self {
        Self { supervisor, tag }
    }

    /// Build a supervisor for `link`, start its reconnection task and wrap it
    /// in a gate
    pub fn start(
        link: L,
        endpoint: Endpoint,
        policy: RetryPolicy,
        io_timeout: Duration,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(link),
            endpoint,
            policy,
            io_timeout,
        ));
        let handle = supervisor.spawn();
        (Arc::new(Self::new(supervisor)), handle)
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor<L>> {
        &self.supervisor
    }

    /// Write the stop bit once
    pub async fn execute(&self, command: StopCommand) -> Result<(), GateError> {
        let state = self.supervisor.current_state();
        if state != LinkState::Ready {
            debug!(%state, value = command.value, "Stop write refused, link not ready");
            return Err(GateError::NotReady);
        }

        let guard = self.supervisor.lock().await;
        let link = Arc::clone(self.supervisor.link());
        let io_timeout = self.supervisor.io_timeout();
        let tag = self.tag;

        // Once the lock is held the exchange runs to completion on its own
        // task, even if the caller is dropped mid-write.
        let task = tokio::spawn(write_locked(guard, link, io_timeout, tag, command));
        match task.await {
            Ok(result) => result,
            Err(e) => Err(GateError::Link(LinkError::Protocol(format!(
                "stop write task failed: {}",
                e
            )))),
        }
    }

    /// Boolean form of [`execute`](Self::execute): `true` only if the write
    /// reached the controller
    pub async fn set_stop(&self, value: bool) -> bool {
        self.execute(StopCommand::new(value)).await.is_ok()
    }
}

/// The held section of a write: one bounded exchange, faulting the session on failure
async fn write_locked<L: ControllerLink + 'static>(
    mut guard: SessionGuard<L>,
    link: Arc<L>,
    io_timeout: Duration,
    tag: Tag,
    command: StopCommand,
) -> Result<(), GateError> {
    // The link may have faulted while this call waited for its turn
    let Some(session) = guard.session_mut() else {
        debug!(value = command.value, "Stop write refused, session lost while queued");
        return Err(GateError::NotReady);
    };

    let result = match timeout(io_timeout, link.write_bit(session, &tag, command.value)).await {
        Ok(result) => result,
        Err(_) => Err(LinkError::timed_out("write")),
    };

    match result {
        Ok(()) => {
            info!(tag = %tag, value = command.value, "Stop bit written");
            Ok(())
        }
        Err(e) => {
            error!(tag = %tag, value = command.value, error = %e, "Stop bit write failed");
            guard.report_fault(&e).await;
            Err(GateError::Link(e))
        }
    }
}

/// Link-agnostic view of a gate, as held by the HTTP layer
#[async_trait]
pub trait StopControl: Send + Sync {
    async fn execute(&self, command: StopCommand) -> Result<(), GateError>;

    fn link_state(&self) -> LinkState;

    fn endpoint(&self) -> &Endpoint;

    fn connection_attempts(&self) -> u64;
}

#[async_trait]
impl<L: ControllerLink + 'static> StopControl for CommandGate<L> {
    async fn execute(&self, command: StopCommand) -> Result<(), GateError> {
        CommandGate::execute(self, command).await
    }

    fn link_state(&self) -> LinkState {
        self.supervisor.current_state()
    }

    fn endpoint(&self) -> &Endpoint {
        self.supervisor.endpoint()
    }

    fn connection_attempts(&self) -> u64 {
        self.supervisor.attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::SimulatedLink;

    fn gate(link: &SimulatedLink) -> CommandGate<SimulatedLink> {
        CommandGate::new(Arc::new(ConnectionSupervisor::new(
            Arc::new(link.clone()),
            Endpoint::new("10.0.0.5", 0, 1),
            RetryPolicy::default(),
            Duration::from_secs(3),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_fails_fast_without_io() {
        let link = SimulatedLink::new();
        // supervisor never spawned: stays Disconnected
        let gate = gate(&link);

        assert_eq!(gate.execute(StopCommand::new(true)).await, Err(GateError::NotReady));
        assert!(!gate.set_stop(false).await);
        assert!(link.writes().is_empty());
        assert_eq!(link.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_write_times_out_and_faults() {
        let link = SimulatedLink::new();
        let gate = gate(&link);
        let mut states = gate.supervisor().subscribe();
        gate.supervisor().spawn();
        states.wait_for(|s| *s == LinkState::Ready).await.unwrap();

        link.set_hung(true);
        let err = gate.execute(StopCommand::new(true)).await.unwrap_err();

        assert_eq!(err, GateError::Link(LinkError::timed_out("write")));
        assert_eq!(gate.link_state(), LinkState::Disconnected);
        assert!(gate.supervisor().pending_retry().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_abort_write() {
        let link = SimulatedLink::new();
        link.set_write_latency(Duration::from_millis(100));
        let gate = gate(&link);
        let mut states = gate.supervisor().subscribe();
        gate.supervisor().spawn();
        states.wait_for(|s| *s == LinkState::Ready).await.unwrap();

        let abandoned = timeout(Duration::from_millis(10), gate.execute(StopCommand::new(true))).await;
        assert!(abandoned.is_err());

        // Queues behind the abandoned write, which still completes
        assert!(gate.set_stop(false).await);

        let writes = link.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].value);
        assert!(!writes[1].value);
        assert!(writes[0].finished <= writes[1].started);
        assert_eq!(link.max_concurrent_writes(), 1);
        assert_eq!(gate.link_state(), LinkState::Ready);
    }
}
