//! # Telemetry Fan-out
//!
//! Ingests electrical-quality sensor readings from a publish-subscribe feed
//! and distributes the latest value per channel to any number of live
//! dashboard sessions, with bounded memory per consumer.
//!
//! ## Core Concepts
//!
//! - **Channels**: Fixed metric streams (voltage, current, ...) with unit,
//!   valid range, thresholds and staleness window
//! - **Samples**: Validated, sequenced readings produced by the decoder
//! - **Store**: Latest value per channel, single writer, many readers
//! - **Hub**: Per-session bounded queues with drop-oldest back-pressure
//! - **Sessions**: Connect, backlog replay, disconnect and idle timeout
//!
//! ## Example
//!
//! ```ignore
//! use gridwatch::{TelemetryConfig, TelemetryService, HubEvent};
//!
//! let service = TelemetryService::new(TelemetryConfig::default())?;
//! let session = service.connect();
//!
//! service.ingest("sensor/arus1", b"5.0")?;
//!
//! for event in session.drain() {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

pub mod channels;
pub mod config;
pub mod decoder;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod service;
pub mod sessions;
pub mod store;
pub mod threshold;
pub mod types;

// Re-exports
pub use channels::{Channel, ChannelRegistry, Thresholds, ValidRange};
pub use config::{BrokerConfig, ChannelConfig, RangeConfig, TelemetryConfig, ThresholdConfig};
pub use decoder::{DecodeStatsSnapshot, Decoder, Sample};
pub use error::{ConfigError, DecodeError, Result, SessionError};
pub use hub::{
    CloseReason, FanoutHub, HubConfig, HubEvent, SessionHandle, SessionState, SessionStats,
    Snapshot,
};
pub use ingest::{FeedMessage, FeedSender, IngestSummary, IngestWorker};
pub use service::{FeedStatus, TelemetryService};
pub use sessions::{SessionManager, SweeperHandle};
pub use store::{AppliedResult, ChannelState, LatestValueStore};
pub use threshold::{evaluate, WarningState};
pub use types::*;
