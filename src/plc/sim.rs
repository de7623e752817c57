//! In-process controller simulator
//!
//! Stands in for the controller in development mode and in tests. The
//! simulator can be taken offline, severed under an open session, slowed
//! down, or hung outright; it records every write with its start and end
//! instants so callers can check that writes never overlap.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::link::{ControllerLink, LinkError};
use super::{Endpoint, Tag};

/// One completed write against the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub tag: &'static str,
    pub value: bool,
    pub started: Instant,
    pub finished: Instant,
}

/// Session handle; goes stale when the simulator is severed
#[derive(Debug)]
pub struct SimulatedSession {
    generation: u64,
}

#[derive(Debug, Default)]
struct SimState {
    reachable: AtomicBool,
    hung: AtomicBool,
    generation: AtomicU64,
    write_latency_ms: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stop_bit: AtomicBool,
    writes: Mutex<Vec<WriteRecord>>,
}

/// Simulated controller. Clones share the same simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    state: Arc<SimState>,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLink {
    /// A reachable simulator with instant writes
    pub fn new() -> Self {
        let state = SimState::default();
        state.reachable.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// A simulator that refuses every connection until [`restore`](Self::restore)
    pub fn unreachable() -> Self {
        let link = Self::new();
        link.state.reachable.store(false, Ordering::SeqCst);
        link
    }

    /// Drop the transport: open sessions go stale and new opens fail
    pub fn sever(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.reachable.store(false, Ordering::SeqCst);
    }

    /// Bring the simulated controller back online
    pub fn restore(&self) {
        self.state.reachable.store(true, Ordering::SeqCst);
    }

    /// Make every open and write hang forever
    pub fn set_hung(&self, hung: bool) {
        self.state.hung.store(hung, Ordering::SeqCst);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.state
            .write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of session opens attempted
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of sessions closed
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Most writes ever observed in flight at once
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Completed writes in completion order
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state
            .writes
            .lock()
            .map(|writes| writes.clone())
            .unwrap_or_default()
    }

    /// Current value of the simulated stop bit
    pub fn stop_bit(&self) -> bool {
        self.state.stop_bit.load(Ordering::SeqCst)
    }

    async fn hang_if_requested(&self) {
        if self.state.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ControllerLink for SimulatedLink {
    type Session = SimulatedSession;

    async fn open(&self, endpoint: &Endpoint) -> Result<Self::Session, LinkError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.hang_if_requested().await;

        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(LinkError::Unreachable(format!(
                "connection to {} timed out (simulated)",
                endpoint
            )));
        }

        debug!(%endpoint, "Simulated controller session opened");
        Ok(SimulatedSession {
            generation: self.state.generation.load(Ordering::SeqCst),
        })
    }

    async fn write_bit(
        &self,
        session: &mut Self::Session,
        tag: &Tag,
        value: bool,
    ) -> Result<(), LinkError> {
        self.hang_if_requested().await;

        if session.generation != self.state.generation.load(Ordering::SeqCst) {
            return Err(LinkError::Unreachable(
                "connection reset by peer (simulated)".into(),
            ));
        }

        let started = Instant::now();
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let latency = self.state.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.state.stop_bit.store(value, Ordering::SeqCst);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let record = WriteRecord {
            tag: tag.name,
            value,
            started,
            finished: Instant::now(),
        };
        if let Ok(mut writes) = self.state.writes.lock() {
            writes.push(record);
        }
        Ok(())
    }

    async fn close(&self, session: Self::Session) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        debug!(generation = session.generation, "Simulated controller session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::VISION_STOP;

    #[tokio::test]
    async fn test_write_records_value() {
        let link = SimulatedLink::new();
        let mut session = link.open(&Endpoint::new("sim", 0, 1)).await.unwrap();

        link.write_bit(&mut session, &VISION_STOP, true).await.unwrap();

        assert!(link.stop_bit());
        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].tag, "VISION_STOP");
        assert!(writes[0].value);
    }

    #[tokio::test]
    async fn test_sever_invalidates_open_session() {
        let link = SimulatedLink::new();
        let mut session = link.open(&Endpoint::new("sim", 0, 1)).await.unwrap();

        link.sever();

        let err = link.write_bit(&mut session, &VISION_STOP, false).await.unwrap_err();
        assert!(matches!(err, LinkError::Unreachable(_)));
        assert!(link.open(&Endpoint::new("sim", 0, 1)).await.is_err());

        link.restore();
        let mut fresh = link.open(&Endpoint::new("sim", 0, 1)).await.unwrap();
        assert!(link.write_bit(&mut fresh, &VISION_STOP, false).await.is_ok());
        assert_eq!(link.opens(), 3);
    }
}
