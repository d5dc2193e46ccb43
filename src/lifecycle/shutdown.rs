//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

/// Coordinator for graceful shutdown.
///
/// Background tasks (cluster monitor, config reload) subscribe and exit when
/// the signal fires. Each task holds its receiver until it returns, so the
/// receiver count doubles as the number of tasks still running.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Later calls are ignored.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(tasks = self.tx.receiver_count(), "Shutdown triggered");
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Number of subscribed tasks that have not exited yet.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Wait until every subscriber has exited, up to `timeout`.
    /// Returns `false` if tasks were still running at the deadline.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.receiver_count() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(remaining = self.receiver_count(), "Shutdown drain timed out");
                return false;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
