//! Fan-out of channel snapshots to live consumer sessions.
//!
//! Every session owns a bounded FIFO queue. Publishing never blocks: a full
//! queue drops its oldest entry to make room (drop-oldest). This is an
//! intentional, non-lossless policy suited to latest-value dashboards and
//! is not at-least-once delivery.
//!
//! # Example
//!
//! ```ignore
//! let handle = service.connect();
//!
//! loop {
//!     match handle.recv() {
//!         Ok(HubEvent::Backlog { snapshot }) => println!("initial {:?}", snapshot),
//!         Ok(HubEvent::Update { snapshot }) => println!("live {:?}", snapshot),
//!         Ok(HubEvent::Closed { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod fanout;
mod types;

pub use fanout::FanoutHub;
pub(crate) use types::Session;
pub use types::{
    CloseReason, HubConfig, HubEvent, SessionHandle, SessionState, SessionStats, Snapshot,
};
