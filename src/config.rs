//! Service configuration.
//!
//! Configuration is read once at startup, validated, and then frozen. Every
//! field has a default so a partial JSON document is enough; the defaults
//! describe the seven-channel power-quality feed.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default per-session queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default staleness window for a channel (seconds).
pub const DEFAULT_STALE_AFTER_SECS: u64 = 30;

/// Upstream broker connection settings. Consumed by the external link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub client_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://broker.emqx.io:8084/mqtt".to_string(),
            client_id: "gridwatch".to_string(),
        }
    }
}

/// Inclusive bounds a reading must fall within.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub min: f64,
    pub max: f64,
}

/// Warning/critical limits. A value strictly beyond a bound trips it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub warn_above: Option<f64>,
    pub warn_below: Option<f64>,
    pub critical_above: Option<f64>,
    pub critical_below: Option<f64>,
}

/// One topic to channel mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub topic: String,
    #[serde(default)]
    pub unit: String,
    pub range: RangeConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

impl ChannelConfig {
    pub fn new(name: &str, topic: &str, unit: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            unit: unit.to_string(),
            range: RangeConfig { min, max },
            threshold: ThresholdConfig::default(),
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }

    pub fn with_warn_above(mut self, limit: f64) -> Self {
        self.threshold.warn_above = Some(limit);
        self
    }

    pub fn with_critical_above(mut self, limit: f64) -> Self {
        self.threshold.critical_above = Some(limit);
        self
    }

    pub fn with_stale_after_secs(mut self, secs: u64) -> Self {
        self.stale_after_secs = secs;
        self
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub broker: BrokerConfig,

    /// Topic to channel mapping, in display order.
    pub channels: Vec<ChannelConfig>,

    /// Per-session outbound queue capacity (K).
    pub queue_capacity: usize,

    /// Sessions silent for longer than this are force-closed.
    pub idle_timeout_secs: u64,

    /// Interval between idle sweeps.
    pub idle_tick_secs: u64,

    /// Capacity of the inbound feed channel in front of the ingest worker.
    pub feed_buffer: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            channels: default_channels(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_timeout_secs: 60,
            idle_tick_secs: 5,
            feed_buffer: 1024,
        }
    }
}

/// The power-quality meter feed.
pub fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new("voltage", "sensor/tegangan1", "V", 0.0, 500.0),
        ChannelConfig::new("current", "sensor/arus1", "A", 0.0, 100.0).with_warn_above(3.0),
        ChannelConfig::new("energy", "sensor/kwh", "kWh", 0.0, 1.0e9),
        ChannelConfig::new("power", "sensor/watt", "W", 0.0, 100_000.0),
        ChannelConfig::new("frequency", "sensor/freq", "Hz", 0.0, 100.0),
        ChannelConfig::new("power_factor", "sensor/pf", "", 0.0, 1.0),
        ChannelConfig::new("cost", "sensor/cost", "", 0.0, 1.0e12),
    ]
}

impl TelemetryConfig {
    /// Parse configuration from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: TelemetryConfig = serde_json::from_str(s)?;
        Ok(config)
    }

    /// Read configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_secs(self.idle_tick_secs)
    }

    /// Check the settings that are not covered by registry construction.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.queue_capacity < self.channels.len() {
            return Err(ConfigError::QueueCapacity {
                capacity: self.queue_capacity,
                channels: self.channels.len(),
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidDuration("idle_timeout_secs"));
        }
        if self.idle_tick_secs == 0 {
            return Err(ConfigError::InvalidDuration("idle_tick_secs"));
        }
        if self.feed_buffer == 0 {
            return Err(ConfigError::InvalidDuration("feed_buffer"));
        }
        for channel in &self.channels {
            if channel.stale_after_secs == 0 {
                return Err(ConfigError::InvalidDuration("stale_after_secs"));
            }
        }
        Ok(())
    }
}
