//! Immutable topic to channel mapping.

use crate::config::{ChannelConfig, ThresholdConfig};
use crate::error::{ConfigError, Result};
use crate::types::ChannelId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Inclusive value bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Warning and critical limits for a channel.
pub type Thresholds = ThresholdConfig;

/// One logical metric stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub topic: String,
    pub unit: String,
    pub valid_range: ValidRange,
    pub thresholds: Thresholds,
    pub stale_after: Duration,
}

/// Static lookup from topic and name to channel.
#[derive(Debug)]
pub struct ChannelRegistry {
    /// Channels in configuration order, indexed by `ChannelId`.
    channels: Vec<Arc<Channel>>,
    by_topic: HashMap<String, ChannelId>,
    by_name: HashMap<String, ChannelId>,
}

impl ChannelRegistry {
    /// Build the registry. Fails on duplicate names or topics and on bad bounds.
    pub fn new(configs: &[ChannelConfig]) -> Result<Self> {
        let mut channels = Vec::with_capacity(configs.len());
        let mut by_topic = HashMap::with_capacity(configs.len());
        let mut by_name = HashMap::with_capacity(configs.len());

        for config in configs {
            if config.name.is_empty() {
                return Err(ConfigError::EmptyName(config.topic.clone()));
            }
            validate_range(config)?;
            validate_thresholds(config)?;

            let id = ChannelId(channels.len());
            if by_name.insert(config.name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateChannel(config.name.clone()));
            }
            if by_topic.insert(config.topic.clone(), id).is_some() {
                return Err(ConfigError::DuplicateTopic(config.topic.clone()));
            }

            channels.push(Arc::new(Channel {
                id,
                name: config.name.clone(),
                topic: config.topic.clone(),
                unit: config.unit.clone(),
                valid_range: ValidRange {
                    min: config.range.min,
                    max: config.range.max,
                },
                thresholds: config.threshold,
                stale_after: Duration::from_secs(config.stale_after_secs),
            }));
        }

        Ok(Self {
            channels,
            by_topic,
            by_name,
        })
    }

    /// Channel a topic is mapped to, if any.
    pub fn channel_for(&self, topic: &str) -> Option<&Arc<Channel>> {
        self.by_topic.get(topic).map(|id| &self.channels[id.0])
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<Channel>> {
        self.by_name.get(name).map(|id| &self.channels[id.0])
    }

    pub fn get(&self, id: ChannelId) -> Option<&Arc<Channel>> {
        self.channels.get(id.0)
    }

    /// All channels in configuration order.
    pub fn all_channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn validate_range(config: &ChannelConfig) -> Result<()> {
    let (min, max) = (config.range.min, config.range.max);
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(ConfigError::InvalidRange {
            channel: config.name.clone(),
            min,
            max,
        });
    }
    Ok(())
}

fn validate_thresholds(config: &ChannelConfig) -> Result<()> {
    let t = &config.threshold;
    let invalid = |detail: &str| ConfigError::InvalidThreshold {
        channel: config.name.clone(),
        detail: detail.to_string(),
    };

    for limit in [t.warn_above, t.warn_below, t.critical_above, t.critical_below]
        .into_iter()
        .flatten()
    {
        if !limit.is_finite() {
            return Err(invalid("limit must be finite"));
        }
    }
    if let (Some(warn), Some(crit)) = (t.warn_above, t.critical_above) {
        if warn > crit {
            return Err(invalid("warn_above exceeds critical_above"));
        }
    }
    if let (Some(warn), Some(crit)) = (t.warn_below, t.critical_below) {
        if warn < crit {
            return Err(invalid("warn_below is under critical_below"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_channels;

    #[test]
    fn test_lookup_by_topic_and_name() {
        let registry = ChannelRegistry::new(&default_channels()).unwrap();
        assert_eq!(registry.len(), 7);

        let current = registry.channel_for("sensor/arus1").unwrap();
        assert_eq!(current.name, "current");
        assert_eq!(current.unit, "A");
        assert_eq!(current.thresholds.warn_above, Some(3.0));
        assert_eq!(registry.by_name("current").unwrap().id, current.id);

        assert!(registry.channel_for("sensor/unknown").is_none());
    }

    #[test]
    fn test_order_is_preserved() {
        let registry = ChannelRegistry::new(&default_channels()).unwrap();
        let names: Vec<_> = registry
            .all_channels()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            names,
            ["voltage", "current", "energy", "power", "frequency", "power_factor", "cost"]
        );
        for (i, channel) in registry.all_channels().iter().enumerate() {
            assert_eq!(channel.id, ChannelId(i));
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let configs = vec![
            ChannelConfig::new("voltage", "a", "V", 0.0, 1.0),
            ChannelConfig::new("voltage", "b", "V", 0.0, 1.0),
        ];
        let err = ChannelRegistry::new(&configs).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChannel(name) if name == "voltage"));
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let configs = vec![
            ChannelConfig::new("voltage", "sensor/v", "V", 0.0, 1.0),
            ChannelConfig::new("current", "sensor/v", "A", 0.0, 1.0),
        ];
        let err = ChannelRegistry::new(&configs).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTopic(_)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let configs = vec![ChannelConfig::new("voltage", "v", "V", 10.0, 1.0)];
        let err = ChannelRegistry::new(&configs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { .. }));
    }

    #[test]
    fn test_point_range_allowed() {
        let configs = vec![ChannelConfig::new("fixed", "f", "", 5.0, 5.0)];
        let registry = ChannelRegistry::new(&configs).unwrap();
        assert!(registry.all_channels()[0].valid_range.contains(5.0));
    }

    #[test]
    fn test_warning_beyond_critical_rejected() {
        let configs = vec![ChannelConfig::new("current", "c", "A", 0.0, 100.0)
            .with_warn_above(10.0)
            .with_critical_above(5.0)];
        let err = ChannelRegistry::new(&configs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
    }
}
