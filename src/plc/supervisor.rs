//! Controller connection supervisor
//!
//! Owns the single controller session and the [`LinkState`] machine:
//!
//! ```text
//! Disconnected --attempt--> Connecting --ok--> Ready
//!      ^                        |                |
//!      +------- retry later ----+                | write failure / reported fault
//!      +---------------------- Faulted <---------+
//! ```
//!
//! The session and every state transition sit behind one async mutex, so a
//! write never runs against a session being torn down and a reconnection never
//! tears down a session mid-write. The state is mirrored into a watch channel
//! so readers never wait on that mutex.
//!
//! Retries use a fixed delay and never stop. At most one attempt is pending
//! or in flight at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::link::{ControllerLink, LinkError};
use super::{Endpoint, LinkState, RetryPolicy};

/// State guarded by the supervisor lock
struct Inner<S> {
    /// Present exactly when the published state is `Ready`
    session: Option<S>,
    /// When the next connection attempt is due, if one is scheduled
    next_attempt: Option<Instant>,
}

/// Keeps one controller session alive, or keeps trying to
pub struct ConnectionSupervisor<L: ControllerLink> {
    link: Arc<L>,
    endpoint: Endpoint,
    policy: RetryPolicy,
    io_timeout: Duration,
    inner: Arc<Mutex<Inner<L::Session>>>,
    state_tx: watch::Sender<LinkState>,
    wake: Notify,
    attempts: AtomicU64,
}

impl<L: ControllerLink + 'static> ConnectionSupervisor<L> {
    /// Create a supervisor in `Disconnected` with an attempt due immediately.
    ///
    /// Nothing happens until [`spawn`](Self::spawn) starts the reconnection task.
    pub fn new(link: Arc<L>, endpoint: Endpoint, policy: RetryPolicy, io_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            link,
            endpoint,
            policy,
            io_timeout,
            inner: Arc::new(Mutex::new(Inner {
                session: None,
                next_attempt: Some(Instant::now()),
            })),
            state_tx,
            wake: Notify::new(),
            attempts: AtomicU64::new(0),
        }
    }

    /// Start the background reconnection task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.run().await;
        })
    }

    /// Current link state. Never blocks.
    pub fn current_state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Watch link state transitions
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Instant of the scheduled connection attempt, if any
    pub async fn pending_retry(&self) -> Option<Instant> {
        self.inner.lock().await.next_attempt
    }

    /// Number of connection attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Bound applied to every open, write and close
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Take exclusive hold of the session. Waiters are served in arrival order.
    ///
    /// The guard is owned, so the held section can be moved onto its own task.
    pub async fn lock(self: &Arc<Self>) -> SessionGuard<L> {
        SessionGuard {
            supervisor: Arc::clone(self),
            inner: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Report a failure of the current session.
    ///
    /// `Ready` moves to `Disconnected` and exactly one retry is scheduled.
    /// In any other state this does nothing.
    pub async fn report_fault(&self, reason: &LinkError) {
        let mut inner = self.inner.lock().await;
        self.fault_locked(&mut inner, reason).await;
    }

    /// Reconnection loop: sleeps until the scheduled attempt, runs it, repeats
    async fn run(&self) {
        info!(
            endpoint = %self.endpoint,
            retry_delay = ?self.policy.delay,
            "Controller supervisor started"
        );

        loop {
            let next_attempt = self.inner.lock().await.next_attempt;
            match next_attempt {
                Some(at) => {
                    tokio::select! {
                        _ = sleep_until(at) => self.attempt().await,
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
        }
    }

    /// One connection attempt, if one is due and the link is down
    async fn attempt(&self) {
        let mut inner = self.inner.lock().await;

        let state = self.current_state();
        let due = matches!(inner.next_attempt, Some(at) if at <= Instant::now());
        if state != LinkState::Disconnected || !due {
            debug!(%state, due, "Skipping connection attempt");
            return;
        }

        inner.next_attempt = None;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(LinkState::Connecting);
        info!(attempt, endpoint = %self.endpoint, "Connecting to controller");

        let result = match timeout(self.io_timeout, self.link.open(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::timed_out("connect")),
        };

        match result {
            Ok(session) => {
                inner.session = Some(session);
                self.publish(LinkState::Ready);
                info!(attempt, endpoint = %self.endpoint, "Controller connected");
            }
            Err(e) => {
                self.publish(LinkState::Disconnected);
                self.schedule_retry(&mut inner);
                warn!(
                    attempt,
                    error = %e,
                    "Controller connection failed, retrying in {:?}",
                    self.policy.delay
                );
            }
        }
    }

    async fn fault_locked(&self, inner: &mut Inner<L::Session>, reason: &LinkError) {
        let state = self.current_state();
        if state != LinkState::Ready {
            debug!(%state, error = %reason, "Fault reported while not ready, ignoring");
            return;
        }

        self.publish(LinkState::Faulted);
        warn!(
            error = %reason,
            "Controller session faulted, reconnecting in {:?}",
            self.policy.delay
        );

        if let Some(session) = inner.session.take() {
            if timeout(self.io_timeout, self.link.close(session)).await.is_err() {
                debug!("Closing faulted session timed out");
            }
        }

        self.publish(LinkState::Disconnected);
        self.schedule_retry(inner);
    }

    /// Schedule one attempt after the retry delay unless one is already pending
    fn schedule_retry(&self, inner: &mut Inner<L::Session>) {
        if inner.next_attempt.is_some() {
            return;
        }
        inner.next_attempt = Some(Instant::now() + self.policy.delay);
        self.wake.notify_one();
    }

    /// Callers must hold the inner lock
    fn publish(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }
}

/// Exclusive hold on the controller session
pub struct SessionGuard<L: ControllerLink> {
    supervisor: Arc<ConnectionSupervisor<L>>,
    inner: OwnedMutexGuard<Inner<L::Session>>,
}

impl<L: ControllerLink + 'static> SessionGuard<L> {
    /// The open session, or `None` when the link is not `Ready`
    pub fn session_mut(&mut self) -> Option<&mut L::Session> {
        self.inner.session.as_mut()
    }

    /// Fault the session while still holding the lock
    pub async fn report_fault(mut self, reason: &LinkError) {
        let supervisor = Arc::clone(&self.supervisor);
        supervisor.fault_locked(&mut self.inner, reason).await;
    }
}
