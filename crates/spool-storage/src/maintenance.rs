//! Background maintenance worker.
//!
//! Runs [`BlobProvider::maintain`] every maintenance period on a dedicated
//! thread. Correctness never depends on it: leases expire by clock comparison
//! and capacity is enforced on every create. The worker only reclaims space
//! and strips stale lease markers sooner.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::provider::BlobProvider;

/// Owns the maintenance thread. Stops it on [`stop`](Self::stop) or drop.
#[derive(Debug)]
pub struct MaintenanceHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub(crate) fn spawn(
        provider: Arc<BlobProvider>,
        period: Duration,
    ) -> Result<Self, StorageError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let root = provider.directory().root().to_path_buf();

        let thread = thread::Builder::new()
            .name("spool-maintenance".to_string())
            .spawn(move || {
                debug!("Maintenance worker started (every {:?})", period);
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = provider.maintain() {
                                warn!(
                                    "Maintenance of {} failed: {}",
                                    provider.directory().root().display(),
                                    e
                                );
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Maintenance worker stopped");
            })
            .map_err(|e| StorageError::io("spawn maintenance", root, e))?;

        Ok(MaintenanceHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop the worker and wait for an in-progress sweep to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Maintenance worker panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
