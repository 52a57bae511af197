//! Threshold evaluation.
//!
//! A pure function of a channel's latest value and its configured limits.
//! Limits are exclusive: a value equal to the bound does not trip it.

use crate::channels::Thresholds;
use crate::store::ChannelState;
use serde::{Deserialize, Serialize};

/// Alarm level derived from a channel's latest value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningState {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl WarningState {
    /// True for any level above normal.
    pub fn is_warning(self) -> bool {
        self != WarningState::Normal
    }
}

/// Evaluate a channel state. Channels with no value yet are `Normal`.
pub fn evaluate(state: &ChannelState) -> WarningState {
    match &state.latest {
        Some(sample) => level_for(&state.channel.thresholds, sample.value),
        None => WarningState::Normal,
    }
}

/// Level of `value` against `thresholds`.
pub fn level_for(thresholds: &Thresholds, value: f64) -> WarningState {
    let above = |limit: Option<f64>| limit.is_some_and(|l| value > l);
    let below = |limit: Option<f64>| limit.is_some_and(|l| value < l);

    if above(thresholds.critical_above) || below(thresholds.critical_below) {
        WarningState::Critical
    } else if above(thresholds.warn_above) || below(thresholds.warn_below) {
        WarningState::Warning
    } else {
        WarningState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_limits() -> Thresholds {
        Thresholds {
            warn_above: Some(3.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_level() {
        let t = current_limits();
        assert_eq!(level_for(&t, 2.5), WarningState::Normal);
        assert_eq!(level_for(&t, 3.0), WarningState::Normal);
        assert_eq!(level_for(&t, 5.0), WarningState::Warning);
    }

    #[test]
    fn test_multi_level() {
        let t = Thresholds {
            warn_above: Some(240.0),
            critical_above: Some(250.0),
            warn_below: Some(200.0),
            critical_below: Some(180.0),
        };
        assert_eq!(level_for(&t, 220.0), WarningState::Normal);
        assert_eq!(level_for(&t, 245.0), WarningState::Warning);
        assert_eq!(level_for(&t, 260.0), WarningState::Critical);
        assert_eq!(level_for(&t, 190.0), WarningState::Warning);
        assert_eq!(level_for(&t, 100.0), WarningState::Critical);
    }

    #[test]
    fn test_no_limits_is_always_normal() {
        let t = Thresholds::default();
        assert_eq!(level_for(&t, f64::MAX), WarningState::Normal);
        assert_eq!(level_for(&t, f64::MIN), WarningState::Normal);
    }

    #[test]
    fn test_is_warning() {
        assert!(!WarningState::Normal.is_warning());
        assert!(WarningState::Warning.is_warning());
        assert!(WarningState::Critical.is_warning());
    }
}
