//! Service facade tying the pipeline together.

use crate::channels::ChannelRegistry;
use crate::config::TelemetryConfig;
use crate::decoder::{DecodeStatsSnapshot, Decoder};
use crate::error::{DecodeError, Result, SessionError};
use crate::hub::{FanoutHub, HubConfig, SessionHandle, Snapshot};
use crate::sessions::{SessionManager, SweeperHandle};
use crate::store::{AppliedResult, LatestValueStore};
use crate::types::{SessionId, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Health of the upstream feed, as reported by the broker link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedStatus {
    Connected,
    Disconnected { since: Timestamp },
}

impl FeedStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FeedStatus::Disconnected { .. })
    }
}

/// The ingestion and fan-out service.
///
/// Data flows one way:
/// decoder -> latest-value store (+ threshold) -> fan-out hub -> sessions.
pub struct TelemetryService {
    config: TelemetryConfig,
    registry: Arc<ChannelRegistry>,
    decoder: Decoder,
    store: Arc<LatestValueStore>,
    hub: Arc<FanoutHub>,
    sessions: Arc<SessionManager>,
    feed: RwLock<FeedStatus>,
    /// Serializes the ingestion path so sequence order equals apply order.
    write_lock: Mutex<()>,
}

impl TelemetryService {
    /// Validate configuration and build every component.
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ChannelRegistry::new(&config.channels)?);
        let decoder = Decoder::new(Arc::clone(&registry));
        let store = Arc::new(LatestValueStore::new(&registry));
        let hub = Arc::new(FanoutHub::new(
            Arc::clone(&store),
            HubConfig {
                queue_capacity: config.queue_capacity,
            },
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&hub),
            config.idle_timeout(),
        ));

        info!(
            "Telemetry service ready: {} channels, queue capacity {}",
            registry.len(),
            config.queue_capacity
        );

        Ok(Self {
            config,
            registry,
            decoder,
            store,
            hub,
            sessions,
            feed: RwLock::new(FeedStatus::Connected),
            write_lock: Mutex::new(()),
        })
    }

    // --- Ingestion ---

    /// Decode, apply and fan out one inbound message.
    pub fn ingest(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> std::result::Result<AppliedResult, DecodeError> {
        self.ingest_at(topic, payload, Timestamp::now())
    }

    pub fn ingest_at(
        &self,
        topic: &str,
        payload: &[u8],
        now: Timestamp,
    ) -> std::result::Result<AppliedResult, DecodeError> {
        let _lock = self.write_lock.lock();

        let sample = self.decoder.decode_at(topic, payload, now)?;
        let result = self.store.apply(sample);
        if let AppliedResult::Applied(state) = &result {
            self.hub.publish_at(state, now);
        }
        Ok(result)
    }

    /// Record a change in upstream link health.
    ///
    /// Repeated outage reports keep the time the outage began.
    pub fn set_feed_status(&self, status: FeedStatus) {
        let mut feed = self.feed.write();
        if feed.is_degraded() == status.is_degraded() {
            return;
        }
        match status {
            FeedStatus::Connected => info!("Upstream feed recovered"),
            FeedStatus::Disconnected { since } => {
                warn!("Upstream feed down since {:?}, serving last known values", since)
            }
        }
        *feed = status;
    }

    pub fn feed_status(&self) -> FeedStatus {
        *self.feed.read()
    }

    // --- Reads ---

    /// Current snapshot of one channel by name.
    pub fn snapshot(&self, channel: &str) -> Option<Snapshot> {
        let now = Timestamp::now();
        let channel = self.registry.by_name(channel)?;
        self.store
            .read(channel.id)
            .map(|state| Snapshot::from_state(&state, now))
    }

    /// Snapshots of every channel in registry order, staleness against `now`.
    pub fn snapshots_at(&self, now: Timestamp) -> Vec<Snapshot> {
        self.store
            .read_all()
            .iter()
            .map(|state| Snapshot::from_state(state, now))
            .collect()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots_at(Timestamp::now())
    }

    // --- Sessions ---

    pub fn connect(&self) -> SessionHandle {
        self.sessions.on_connect()
    }

    pub fn connect_at(&self, now: Timestamp) -> SessionHandle {
        self.sessions.on_connect_at(now)
    }

    pub fn disconnect(&self, handle: &SessionHandle) -> std::result::Result<(), SessionError> {
        self.sessions.on_disconnect(handle)
    }

    pub fn idle_tick(&self, now: Timestamp) -> Vec<SessionId> {
        self.sessions.on_idle_tick(now)
    }

    /// Start the periodic idle sweep at the configured interval.
    pub fn spawn_sweeper(&self) -> std::io::Result<SweeperHandle> {
        self.sessions.spawn_sweeper(self.config.idle_tick())
    }

    /// Close every session.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }

    // --- Accessors ---

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn decode_stats(&self) -> DecodeStatsSnapshot {
        self.decoder.stats()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }

    pub fn hub(&self) -> &FanoutHub {
        &self.hub
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}
