//! Background idle sweep.

use super::SessionManager;
use crate::types::Timestamp;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Running idle sweeper. Stops when dropped.
pub struct SweeperHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Run `on_idle_tick` every `interval` on a dedicated thread.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> std::io::Result<SweeperHandle> {
        let manager = Arc::clone(self);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let thread = thread::Builder::new()
            .name("gridwatch-idle-sweep".to_string())
            .spawn(move || {
                info!("Idle sweeper started (every {:?})", interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let closed = manager.on_idle_tick(Timestamp::now());
                            if !closed.is_empty() {
                                debug!("Idle sweep closed {} sessions", closed.len());
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                info!("Idle sweeper stopped");
            })?;

        Ok(SweeperHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
