use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::types::{OddsRow, Snapshot};

// ---------------------------------------------------------------------------
// StalenessTracker
// ---------------------------------------------------------------------------

/// Derives the feed-level stale flag from the last successful fetch of any book.
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    threshold: Duration,
    last_success: Option<Instant>,
}

impl StalenessTracker {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold, last_success: None }
    }

    pub fn record_success(&mut self, at: Instant) {
        // Never move backwards if callers pass out-of-order instants.
        if self.last_success.map_or(true, |prev| at > prev) {
            self.last_success = Some(at);
        }
    }

    /// Stale when nothing has ever been fetched, or the last success is older than the threshold.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_success {
            None => true,
            Some(at) => now.saturating_duration_since(at) > self.threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// SnapshotPublisher
// ---------------------------------------------------------------------------

/// Single writer for the process-wide snapshot.
///
/// Publishing swaps the `Arc` held by the watch channel; readers clone the
/// `Arc` and never observe a partially built snapshot.
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<Snapshot>>,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot) -> (Self, watch::Receiver<Arc<Snapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(initial));
        (Self { tx }, rx)
    }

    /// Build and publish the next snapshot. Cycle numbers strictly increase and
    /// timestamps never go backwards, even if the wall clock does.
    pub fn publish(&self, rows: Vec<OddsRow>, stale: bool, now: DateTime<Utc>) -> Arc<Snapshot> {
        let prev = self.tx.borrow().clone();
        let snapshot = Arc::new(Snapshot {
            cycle: prev.cycle + 1,
            timestamp: now.max(prev.timestamp),
            stale,
            rows,
        });
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}
