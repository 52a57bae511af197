//! Fan-out hub for distributing channel snapshots to live sessions.
//!
//! Delivery is superseding, not lossless. Each session has a bounded queue;
//! when it is full the hub evicts the oldest queued event and enqueues the
//! new one. Publishing never blocks on a slow or dead consumer. Consumers
//! that need every sample must read history from elsewhere.

use crate::store::{ChannelState, LatestValueStore};
use crate::types::{SessionId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::types::{
    CloseReason, HubConfig, HubEvent, Session, SessionHandle, SessionState, Snapshot,
};

/// Distributes snapshots to every active session.
pub struct FanoutHub {
    store: Arc<LatestValueStore>,
    /// Fan-out set. Non-owning: sessions are owned by the session table
    /// and the consumer handle.
    sessions: RwLock<HashMap<SessionId, Weak<Session>>>,
    /// Counter for generating session IDs.
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl FanoutHub {
    pub fn new(store: Arc<LatestValueStore>, config: HubConfig) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    /// Register a new session and stage one backlog event per channel.
    ///
    /// The backlog is queued before the session goes `Active`, so it always
    /// precedes the first live update. Sessions are opened through the
    /// session manager, which owns the authoritative table.
    pub(crate) fn subscribe_at(&self, now: Timestamp) -> SessionHandle {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (session, receiver) = Session::new(id, self.queue_capacity, now);

        session.activate_with(|| {
            self.sessions.write().insert(id, Arc::downgrade(&session));
            self.store
                .read_all()
                .iter()
                .map(|state| HubEvent::Backlog {
                    snapshot: Snapshot::from_state(state, now),
                })
                .collect()
        });

        info!("Session {} subscribed", id);
        SessionHandle::new(session, receiver)
    }

    /// Close a session and remove it from fan-out.
    pub fn unsubscribe(&self, handle: &SessionHandle) {
        let session = &handle.session;
        session.begin_drain();
        self.detach(session.id);
        if session.close(CloseReason::Unsubscribed) {
            info!("Session {} unsubscribed", session.id);
        }
    }

    /// Remove a session from the fan-out set without touching its state.
    pub(crate) fn detach(&self, id: SessionId) {
        self.sessions.write().remove(&id);
    }

    /// Push a state to every active session. Returns the number reached.
    pub fn publish(&self, state: &ChannelState) -> usize {
        self.publish_at(state, Timestamp::now())
    }

    pub fn publish_at(&self, state: &ChannelState, now: Timestamp) -> usize {
        let event = HubEvent::Update {
            snapshot: Snapshot::from_state(state, now),
        };

        let mut live = Vec::new();
        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, weak) in sessions.iter() {
                match weak.upgrade() {
                    Some(session) => live.push(session),
                    None => dead.push(*id),
                }
            }
        }

        // Pushes happen outside the fan-out lock; a session closing
        // concurrently turns its push into a no-op.
        let mut delivered = 0;
        for session in live {
            if session.push(event.clone()) {
                delivered += 1;
            } else if session.state() != SessionState::Connecting {
                dead.push(session.id);
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write();
            for id in dead {
                if sessions.remove(&id).is_some() {
                    debug!("Pruned session {} from fan-out", id);
                }
            }
        }

        delivered
    }

    /// Number of sessions in the fan-out set.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::config::ChannelConfig;
    use crate::decoder::Decoder;
    use crate::store::AppliedResult;

    fn setup(capacity: usize) -> (Decoder, Arc<LatestValueStore>, FanoutHub) {
        let registry = Arc::new(
            ChannelRegistry::new(&[
                ChannelConfig::new("voltage", "sensor/tegangan1", "V", 0.0, 500.0),
                ChannelConfig::new("current", "sensor/arus1", "A", 0.0, 100.0)
                    .with_warn_above(3.0),
            ])
            .unwrap(),
        );
        let store = Arc::new(LatestValueStore::new(&registry));
        let hub = FanoutHub::new(
            Arc::clone(&store),
            HubConfig {
                queue_capacity: capacity,
            },
        );
        (Decoder::new(registry), store, hub)
    }

    fn subscribe(hub: &FanoutHub) -> SessionHandle {
        hub.subscribe_at(Timestamp::now())
    }

    fn ingest(
        decoder: &Decoder,
        store: &LatestValueStore,
        hub: &FanoutHub,
        topic: &str,
        payload: &str,
    ) {
        let sample = decoder.decode(topic, payload.as_bytes()).unwrap();
        if let AppliedResult::Applied(state) = store.apply(sample) {
            hub.publish(&state);
        }
    }

    #[test]
    fn test_subscribe_receives_backlog() {
        let (decoder, store, hub) = setup(8);
        ingest(&decoder, &store, &hub, "sensor/tegangan1", "221.5");

        let handle = subscribe(&hub);
        assert_eq!(handle.state(), SessionState::Active);
        assert_eq!(hub.session_count(), 1);

        let events = handle.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, HubEvent::Backlog { .. })));
        let voltage = events[0].snapshot().unwrap();
        assert_eq!(voltage.channel, "voltage");
        assert_eq!(voltage.value, Some(221.5));
        let current = events[1].snapshot().unwrap();
        assert_eq!(current.value, None);
        assert!(current.stale);
    }

    #[test]
    fn test_publish_after_backlog() {
        let (decoder, store, hub) = setup(8);
        let handle = subscribe(&hub);

        ingest(&decoder, &store, &hub, "sensor/arus1", "5.0");

        let events = handle.drain();
        assert_eq!(events.len(), 3);
        match &events[2] {
            HubEvent::Update { snapshot } => {
                assert_eq!(snapshot.channel, "current");
                assert_eq!(snapshot.value, Some(5.0));
                assert!(snapshot.warning);
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn test_slow_subscriber_keeps_latest() {
        let (decoder, store, hub) = setup(4);
        let slow = subscribe(&hub);
        let fast = subscribe(&hub);
        fast.drain();

        for i in 0..10 {
            ingest(&decoder, &store, &hub, "sensor/arus1", &format!("{}.0", i));
            fast.drain();
        }

        let events = slow.drain();
        let values: Vec<_> = events
            .iter()
            .map(|e| e.snapshot().unwrap().value.unwrap())
            .collect();
        assert_eq!(values, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(slow.stats().evicted, 8);
        // Slow consumer is not dropped, only trimmed.
        assert_eq!(hub.session_count(), 2);
    }

    #[test]
    fn test_unsubscribe_removes_from_fanout() {
        let (decoder, store, hub) = setup(8);
        let handle = subscribe(&hub);
        handle.drain();

        hub.unsubscribe(&handle);
        assert_eq!(hub.session_count(), 0);
        assert_eq!(handle.state(), SessionState::Closed);

        ingest(&decoder, &store, &hub, "sensor/arus1", "1.0");
        let events = handle.drain();
        assert_eq!(
            events,
            vec![HubEvent::Closed {
                reason: CloseReason::Unsubscribed
            }]
        );
    }

    #[test]
    fn test_dropped_handle_is_pruned() {
        let (decoder, store, hub) = setup(8);
        let handle = subscribe(&hub);
        drop(handle);
        assert_eq!(hub.session_count(), 1);

        ingest(&decoder, &store, &hub, "sensor/arus1", "1.0");
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (_, _, hub) = setup(0);
        assert_eq!(hub.queue_capacity(), 1);
    }
}
