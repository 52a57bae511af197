//! Session and event types for the fan-out hub.

use crate::error::SessionError;
use crate::store::ChannelState;
use crate::threshold::WarningState;
use crate::types::{SessionId, Timestamp};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Hub settings.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Outbound queue capacity per session (K).
    /// Default: 64
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::config::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Lifecycle of a subscriber session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, backlog being staged.
    Connecting,
    /// Receiving live updates.
    Active,
    /// Removed from fan-out; consumer may still read what is queued.
    Draining,
    /// Terminal. Queue released.
    Closed,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Draining) | (Active, Draining) | (Draining, Closed)
        )
    }
}

/// Why a session was closed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Consumer transport went away.
    Disconnected,
    /// No consumer activity within the idle timeout.
    IdleTimeout,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// Service shutting down.
    Shutdown,
    /// Transport error reported by the consumer side.
    Transport(String),
}

/// Wire form of a channel state, one per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub channel: String,
    pub value: Option<f64>,
    pub unit: String,
    /// Microseconds since Unix epoch.
    pub updated_at: Option<i64>,
    pub warning: bool,
    pub level: WarningState,
    pub stale: bool,
    pub sequence: Option<u64>,
}

impl Snapshot {
    /// Build a snapshot, computing staleness against `now`.
    pub fn from_state(state: &ChannelState, now: Timestamp) -> Self {
        Self {
            channel: state.channel.name.clone(),
            value: state.value(),
            unit: state.channel.unit.clone(),
            updated_at: state.updated_at.map(|t| t.0),
            warning: state.warning.is_warning(),
            level: state.warning,
            stale: state.is_stale(now),
            sequence: state.latest.as_ref().map(|s| s.sequence.0),
        }
    }
}

/// Events delivered to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// Current state replayed at subscribe time.
    Backlog { snapshot: Snapshot },
    /// Live update.
    Update { snapshot: Snapshot },
    /// Session ended. Always the last event.
    Closed { reason: CloseReason },
}

impl HubEvent {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            HubEvent::Backlog { snapshot } | HubEvent::Update { snapshot } => Some(snapshot),
            HubEvent::Closed { .. } => None,
        }
    }
}

/// Delivery counters for one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub enqueued: u64,
    /// Entries discarded by drop-oldest.
    pub evicted: u64,
}

/// Producer side of a session's bounded queue.
///
/// The hub keeps its own receiver so it can pop the head when full.
struct OutboundQueue {
    sender: Sender<HubEvent>,
    evictor: Receiver<HubEvent>,
}

/// Shared session state. Owned by the session manager and the consumer
/// handle; the hub only holds a `Weak`.
pub(crate) struct Session {
    pub(crate) id: SessionId,
    state: Mutex<SessionState>,
    last_seen: AtomicI64,
    /// `None` once closed. Also serializes pushes to this session.
    queue: Mutex<Option<OutboundQueue>>,
    enqueued: AtomicU64,
    evicted: AtomicU64,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        capacity: usize,
        now: Timestamp,
    ) -> (Arc<Self>, Receiver<HubEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let session = Arc::new(Self {
            id,
            state: Mutex::new(SessionState::Connecting),
            last_seen: AtomicI64::new(now.0),
            queue: Mutex::new(Some(OutboundQueue {
                sender,
                evictor: receiver.clone(),
            })),
            enqueued: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        });
        (session, receiver)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn last_seen(&self) -> Timestamp {
        Timestamp(self.last_seen.load(Ordering::Relaxed))
    }

    pub(crate) fn touch(&self, now: Timestamp) {
        self.last_seen.fetch_max(now.0, Ordering::Relaxed);
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Stage events while still `Connecting`, then go `Active`.
    ///
    /// Runs under the push lock so no live update can overtake the backlog.
    pub(crate) fn activate_with<F>(&self, stage: F) -> bool
    where
        F: FnOnce() -> Vec<HubEvent>,
    {
        let queue = self.queue.lock();
        let Some(queue) = queue.as_ref() else {
            return false;
        };
        for event in stage() {
            self.push_locked(queue, event);
        }
        self.transition(SessionState::Active)
    }

    /// Enqueue a live event. A no-op unless the session is `Active`.
    pub(crate) fn push(&self, event: HubEvent) -> bool {
        let queue = self.queue.lock();
        let Some(queue) = queue.as_ref() else {
            return false;
        };
        if self.state() != SessionState::Active {
            return false;
        }
        self.push_locked(queue, event)
    }

    /// Drop-oldest enqueue. Never blocks.
    fn push_locked(&self, queue: &OutboundQueue, mut event: HubEvent) -> bool {
        loop {
            match queue.sender.try_send(event) {
                Ok(()) => {
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(TrySendError::Full(rejected)) => {
                    // The consumer may have drained concurrently; either way
                    // there is room on the next attempt.
                    if queue.evictor.try_recv().is_ok() {
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                        trace!("Session {} queue full, evicted oldest", self.id);
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// Stop fan-out to this session without releasing the queue.
    pub(crate) fn begin_drain(&self) -> bool {
        let _queue = self.queue.lock();
        self.transition(SessionState::Draining)
    }

    /// Close the session and release its queue.
    ///
    /// Passes through `Draining` if the caller has not already. Idempotent:
    /// returns false if it was already closed.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let mut queue = self.queue.lock();
        let Some(outbound) = queue.take() else {
            return false;
        };
        {
            let mut state = self.state.lock();
            if state.can_transition_to(SessionState::Draining) {
                *state = SessionState::Draining;
            }
            *state = SessionState::Closed;
        }
        self.push_locked(&outbound, HubEvent::Closed { reason });
        true
    }

    pub(crate) fn stats(&self) -> SessionStats {
        SessionStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side of a session.
///
/// Dropping the handle counts as a transport-initiated close.
pub struct SessionHandle {
    pub(crate) session: Arc<Session>,
    receiver: Receiver<HubEvent>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<Session>, receiver: Receiver<HubEvent>) -> Self {
        Self { session, receiver }
    }

    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// Number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Record consumer activity (e.g. a transport heartbeat).
    pub fn touch(&self) {
        self.session.touch(Timestamp::now());
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<HubEvent, SessionError> {
        let event = self
            .receiver
            .recv()
            .map_err(|_| SessionError::Closed(self.id()))?;
        self.touch();
        Ok(event)
    }

    /// Try to receive an event (non-blocking). `None` when the queue is empty.
    pub fn try_recv(&self) -> Result<Option<HubEvent>, SessionError> {
        match self.receiver.try_recv() {
            Ok(event) => {
                self.touch();
                Ok(Some(event))
            }
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(SessionError::Closed(self.id()))
            }
        }
    }

    /// Receive with timeout. `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<HubEvent>, SessionError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.touch();
                Ok(Some(event))
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(SessionError::Closed(self.id()))
            }
        }
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<HubEvent> {
        let events: Vec<_> = self.receiver.try_iter().collect();
        if !events.is_empty() {
            self.touch();
        }
        events
    }

    /// Report a consumer transport failure. The session is closed.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.session.begin_drain();
        self.session.close(CloseReason::Transport(error));
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.begin_drain();
        self.session.close(CloseReason::Disconnected);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.session.id)
            .field("state", &self.session.state())
            .finish()
    }
}
