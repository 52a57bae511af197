//! Session table and state transitions.

use crate::error::SessionError;
use crate::hub::{CloseReason, FanoutHub, Session, SessionHandle, SessionState};
use crate::types::{SessionId, Timestamp};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks every connected session.
///
/// Registration and removal are serialized through the table lock so a
/// session closing can never race its own registration.
pub struct SessionManager {
    hub: Arc<FanoutHub>,
    table: Mutex<HashMap<SessionId, Arc<Session>>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(hub: Arc<FanoutHub>, idle_timeout: Duration) -> Self {
        Self {
            hub,
            table: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Open a session. It comes back `Active` with its backlog queued.
    pub fn on_connect(&self) -> SessionHandle {
        self.on_connect_at(Timestamp::now())
    }

    pub fn on_connect_at(&self, now: Timestamp) -> SessionHandle {
        let mut table = self.table.lock();
        let handle = self.hub.subscribe_at(now);
        table.insert(handle.id(), Arc::clone(&handle.session));
        info!("Session {} connected ({} open)", handle.id(), table.len());
        handle
    }

    /// Transport-initiated close.
    pub fn on_disconnect(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        self.close(handle.id(), CloseReason::Disconnected)
    }

    /// Close a session whose consumer transport failed.
    pub fn on_transport_error(
        &self,
        id: SessionId,
        error: SessionError,
    ) -> Result<(), SessionError> {
        warn!("Session {} transport error: {}", id, error);
        self.close(id, CloseReason::Transport(error.to_string()))
    }

    /// Close a session by id: drain, detach from fan-out, release the queue.
    pub fn close(&self, id: SessionId, reason: CloseReason) -> Result<(), SessionError> {
        let session = self
            .table
            .lock()
            .remove(&id)
            .ok_or(SessionError::NotFound(id))?;
        self.release(&session, reason);
        Ok(())
    }

    fn release(&self, session: &Session, reason: CloseReason) {
        session.begin_drain();
        self.hub.detach(session.id);
        if session.close(reason.clone()) {
            info!("Session {} closed: {:?}", session.id, reason);
        }
    }

    /// Force-close sessions idle for longer than the timeout.
    ///
    /// Also forgets sessions that were closed from the consumer side.
    /// Returns the ids closed for inactivity.
    pub fn on_idle_tick(&self, now: Timestamp) -> Vec<SessionId> {
        let mut expired = Vec::new();
        let mut finished = Vec::new();
        {
            let mut table = self.table.lock();
            table.retain(|id, session| {
                if session.state() == SessionState::Closed {
                    finished.push(*id);
                    return false;
                }
                let idle = now.since(session.last_seen());
                if idle > self.idle_timeout {
                    warn!("Session {} idle for {:?}, closing", id, idle);
                    expired.push(Arc::clone(session));
                    return false;
                }
                true
            });
        }

        if !finished.is_empty() {
            debug!("Forgot {} closed sessions", finished.len());
            for id in finished {
                self.hub.detach(id);
            }
        }

        expired
            .iter()
            .map(|session| {
                self.release(session, CloseReason::IdleTimeout);
                session.id
            })
            .collect()
    }

    /// Record activity for a session.
    pub fn touch(&self, id: SessionId, now: Timestamp) -> Result<(), SessionError> {
        let table = self.table.lock();
        let session = table.get(&id).ok_or(SessionError::NotFound(id))?;
        session.touch(now);
        Ok(())
    }

    /// Current state of a session still in the table.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.table.lock().get(&id).map(|s| s.state())
    }

    pub fn session_count(&self) -> usize {
        self.table.lock().len()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Close every session.
    pub fn shutdown(&self) {
        let sessions: Vec<_> = self.table.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            self.release(session, CloseReason::Shutdown);
        }
        info!("Closed {} sessions on shutdown", sessions.len());
    }
}
