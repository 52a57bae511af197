//! Latest-value store.
//!
//! One slot per channel, allocated up front from the registry. Each slot
//! sits behind its own short read/write lock so readers of one channel
//! never contend with writes to another. Only the newest sample per
//! channel is kept; history belongs to whoever consumes the fan-out.

use crate::channels::{Channel, ChannelRegistry};
use crate::decoder::Sample;
use crate::threshold::{evaluate, WarningState};
use crate::types::{ChannelId, Timestamp};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Current state of one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelState {
    pub channel: Arc<Channel>,
    /// Most recent accepted sample, `None` until the first one arrives.
    pub latest: Option<Sample>,
    pub warning: WarningState,
    pub updated_at: Option<Timestamp>,
}

impl ChannelState {
    fn empty(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            latest: None,
            warning: WarningState::Normal,
            updated_at: None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.latest.as_ref().map(|s| s.value)
    }

    /// A channel that has never been updated is stale.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        match self.updated_at {
            Some(updated_at) => now.since(updated_at) > self.channel.stale_after,
            None => true,
        }
    }
}

/// Outcome of [`LatestValueStore::apply`].
#[derive(Clone, Debug, PartialEq)]
pub enum AppliedResult {
    /// The sample replaced the channel's latest value.
    Applied(ChannelState),
    /// Duplicate or out-of-order sample; nothing changed.
    Ignored,
}

impl AppliedResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, AppliedResult::Applied(_))
    }
}

/// Holds the latest validated sample per channel.
pub struct LatestValueStore {
    slots: Vec<RwLock<ChannelState>>,
}

impl LatestValueStore {
    pub fn new(registry: &ChannelRegistry) -> Self {
        let slots = registry
            .all_channels()
            .iter()
            .map(|channel| RwLock::new(ChannelState::empty(Arc::clone(channel))))
            .collect();
        Self { slots }
    }

    /// Apply a sample if it is newer than the channel's current one.
    ///
    /// The warning level is re-evaluated inside the same critical section,
    /// so a reader never observes a value paired with a stale level.
    pub fn apply(&self, sample: Sample) -> AppliedResult {
        let Some(slot) = self.slots.get(sample.channel.id.0) else {
            warn!("Sample for unregistered channel {:?}", sample.channel.id);
            return AppliedResult::Ignored;
        };

        let mut state = slot.write();
        if state.channel.name != sample.channel.name {
            warn!(
                "Sample channel {} does not match slot {}",
                sample.channel.name, state.channel.name
            );
            return AppliedResult::Ignored;
        }
        if let Some(prev) = &state.latest {
            if sample.sequence <= prev.sequence {
                debug!(
                    "Ignoring out-of-order sample for {}: {} <= {}",
                    state.channel.name, sample.sequence.0, prev.sequence.0
                );
                return AppliedResult::Ignored;
            }
        }

        trace!("{} = {}", state.channel.name, sample.value);
        state.updated_at = Some(sample.observed_at);
        state.latest = Some(sample);
        state.warning = evaluate(&state);

        AppliedResult::Applied(state.clone())
    }

    /// Snapshot of a single channel.
    pub fn read(&self, id: ChannelId) -> Option<ChannelState> {
        self.slots.get(id.0).map(|slot| slot.read().clone())
    }

    /// Snapshot of every channel, in registry order.
    pub fn read_all(&self) -> Vec<ChannelState> {
        self.slots.iter().map(|slot| slot.read().clone()).collect()
    }
}
