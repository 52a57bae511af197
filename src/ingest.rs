//! Single-writer ingest worker.
//!
//! The broker link hands `(topic, payload)` pairs to a [`FeedSender`]; one
//! worker thread drains them in arrival order and runs the pipeline. The
//! worker exits once every sender has been dropped.

use crate::service::TelemetryService;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// One inbound message from the publish-subscribe feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Producer side of the ingest queue. Cheap to clone.
#[derive(Clone)]
pub struct FeedSender {
    sender: Sender<FeedMessage>,
}

impl FeedSender {
    /// Enqueue a message, waiting for room. Returns false if the worker is gone.
    pub fn send(&self, message: FeedMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    /// Enqueue without waiting. Returns false if the queue is full or closed.
    pub fn try_send(&self, message: FeedMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                debug!("Ingest queue full, rejecting message on {}", message.topic);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Counts from a finished worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub rejected: u64,
}

/// Running ingest worker.
pub struct IngestWorker {
    thread: JoinHandle<IngestSummary>,
}

impl IngestWorker {
    /// Spawn the worker with the configured feed buffer.
    pub fn spawn(service: Arc<TelemetryService>) -> std::io::Result<(FeedSender, IngestWorker)> {
        let (sender, receiver) = bounded(service.config().feed_buffer);
        let thread = thread::Builder::new()
            .name("gridwatch-ingest".to_string())
            .spawn(move || run(&service, receiver))?;
        Ok((FeedSender { sender }, IngestWorker { thread }))
    }

    /// Wait for the worker to finish. It finishes once all senders are dropped.
    pub fn join(self) -> thread::Result<IngestSummary> {
        self.thread.join()
    }
}

fn run(service: &TelemetryService, receiver: Receiver<FeedMessage>) -> IngestSummary {
    info!("Ingest worker started");
    let mut summary = IngestSummary::default();

    for message in receiver.iter() {
        summary.received += 1;
        match service.ingest(&message.topic, &message.payload) {
            Ok(result) if result.is_applied() => summary.applied += 1,
            Ok(_) => summary.ignored += 1,
            // Already logged and counted by the decoder.
            Err(_) => summary.rejected += 1,
        }
    }

    info!(
        "Ingest worker stopped: {} received, {} applied, {} rejected",
        summary.received, summary.applied, summary.rejected
    );
    summary
}
