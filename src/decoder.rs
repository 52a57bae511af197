//! Turns raw `(topic, payload)` messages into validated samples.
//!
//! Payloads are plain decimal literals: an optional sign, digits, and an
//! optional fractional part. Exponents, hex, `inf`/`nan` and locale
//! separators are rejected. Surrounding ASCII whitespace is ignored.

use crate::channels::{Channel, ChannelRegistry};
use crate::error::DecodeError;
use crate::types::{Sequence, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest payload prefix echoed back in a `Malformed` error.
const PAYLOAD_PREVIEW: usize = 32;

/// One validated observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub channel: Arc<Channel>,
    pub value: f64,
    /// Ingestion time, not broker time.
    pub observed_at: Timestamp,
    pub sequence: Sequence,
}

/// Counters for decoded and dropped messages.
#[derive(Debug, Default)]
pub struct DecodeStats {
    decoded: AtomicU64,
    unknown_topic: AtomicU64,
    malformed: AtomicU64,
    out_of_range: AtomicU64,
}

/// Point-in-time copy of [`DecodeStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStatsSnapshot {
    pub decoded: u64,
    pub unknown_topic: u64,
    pub malformed: u64,
    pub out_of_range: u64,
}

impl DecodeStats {
    pub fn snapshot(&self) -> DecodeStatsSnapshot {
        DecodeStatsSnapshot {
            decoded: self.decoded.load(Ordering::Relaxed),
            unknown_topic: self.unknown_topic.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            out_of_range: self.out_of_range.load(Ordering::Relaxed),
        }
    }

    fn record(&self, err: &DecodeError) {
        let counter = match err {
            DecodeError::UnknownTopic(_) => &self.unknown_topic,
            DecodeError::Malformed { .. } => &self.malformed,
            DecodeError::OutOfRange { .. } => &self.out_of_range,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decoder with one sequence counter per channel.
pub struct Decoder {
    registry: Arc<ChannelRegistry>,
    /// Last sequence handed out, indexed by `ChannelId`.
    counters: Vec<AtomicU64>,
    stats: DecodeStats,
}

impl Decoder {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        let counters = (0..registry.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            registry,
            counters,
            stats: DecodeStats::default(),
        }
    }

    /// Decode a message, stamping it with the current time.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Sample, DecodeError> {
        self.decode_at(topic, payload, Timestamp::now())
    }

    /// Decode a message observed at `now`.
    pub fn decode_at(
        &self,
        topic: &str,
        payload: &[u8],
        now: Timestamp,
    ) -> Result<Sample, DecodeError> {
        let result = self.try_decode(topic, payload, now);
        match &result {
            Ok(_) => {
                self.stats.decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.record(err);
                match err {
                    DecodeError::Malformed { .. } => debug!("Dropping message: {}", err),
                    _ => warn!("Dropping message: {}", err),
                }
            }
        }
        result
    }

    fn try_decode(
        &self,
        topic: &str,
        payload: &[u8],
        now: Timestamp,
    ) -> Result<Sample, DecodeError> {
        let channel = self
            .registry
            .channel_for(topic)
            .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

        let value = parse_decimal(payload).ok_or_else(|| DecodeError::Malformed {
            topic: topic.to_string(),
            payload: preview(payload),
        })?;

        let range = channel.valid_range;
        if !range.contains(value) {
            return Err(DecodeError::OutOfRange {
                channel: channel.name.clone(),
                value,
                min: range.min,
                max: range.max,
            });
        }

        let sequence = self.counters[channel.id.0].fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Sample {
            channel: Arc::clone(channel),
            value,
            observed_at: now,
            sequence: Sequence(sequence),
        })
    }

    pub fn stats(&self) -> DecodeStatsSnapshot {
        self.stats.snapshot()
    }
}

fn preview(payload: &[u8]) -> String {
    if payload.len() <= PAYLOAD_PREVIEW {
        return String::from_utf8_lossy(payload).into_owned();
    }
    let mut text = String::from_utf8_lossy(&payload[..PAYLOAD_PREVIEW]).into_owned();
    text.push_str("...");
    text
}

/// Parse `[+-]digits[.digits]`, returning `None` for anything else.
fn parse_decimal(payload: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?.trim_matches(|c: char| c.is_ascii_whitespace());

    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (unsigned, None),
    };

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) {
        return None;
    }
    if let Some(frac) = frac_part {
        if !all_digits(frac) {
            return None;
        }
    }

    let value: f64 = text.parse().ok()?;
    value.is_finite().then_some(value)
}
