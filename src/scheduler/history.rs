//! History pruner for cleaning up old runs.

use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// How long and how many runs to keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPolicy {
    pub retention: Duration,
    pub max_runs: usize,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            max_runs: 100,
        }
    }
}

/// Background task deleting runs past the history policy.
pub struct HistoryPruner {
    store: Arc<Store>,
    policy: HistoryPolicy,
}

impl HistoryPruner {
    pub fn new(store: Arc<Store>, policy: HistoryPolicy) -> Self {
        Self { store, policy }
    }

    /// Start the pruner; it stops when `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        prune_history(&self.store, &self.policy);
                    }
                }
            }
        })
    }
}

/// Apply `policy` once. Errors are logged, not returned.
pub fn prune_history(store: &Store, policy: &HistoryPolicy) {
    // Retentions too large for chrono keep everything
    let cutoff = ChronoDuration::from_std(policy.retention)
        .ok()
        .and_then(|retention| Utc::now().checked_sub_signed(retention));

    if let Some(cutoff) = cutoff {
        match store.delete_runs_before(cutoff) {
            Ok(0) => {}
            Ok(n) => tracing::info!("HistoryPruner: Deleted {} runs older than {:?}", n, policy.retention),
            Err(e) => tracing::error!("HistoryPruner: Failed to delete old runs: {}", e),
        }
    }

    match store.keep_latest_runs(policy.max_runs) {
        Ok(0) => {}
        Ok(n) => tracing::info!("HistoryPruner: Deleted {} runs beyond the newest {}", n, policy.max_runs),
        Err(e) => tracing::error!("HistoryPruner: Failed to trim history: {}", e),
    }
}
