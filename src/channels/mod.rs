//! Channel registry.
//!
//! Channels are the fixed set of metric streams the service knows about.
//! They are built once from configuration and never change afterwards;
//! every other component addresses them by `ChannelId`.

mod registry;

pub use registry::{Channel, ChannelRegistry, Thresholds, ValidRange};
