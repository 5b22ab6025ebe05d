//! Continuous monitoring: re-run a batch at a fixed interval.

use super::{BatchObserver, BatchRun, BatchScheduler};
use crate::db::Store;
use crate::probe::Target;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodically probes a fixed set of targets and records each run.
pub struct Monitor {
    scheduler: BatchScheduler,
    store: Arc<Store>,
    targets: Vec<Target>,
    interval: Duration,
}

impl Monitor {
    pub fn new(scheduler: BatchScheduler, store: Arc<Store>, targets: Vec<Target>, interval: Duration) -> Self {
        Self {
            scheduler,
            store,
            targets,
            interval,
        }
    }

    /// Start monitoring. Cancelling `shutdown` aborts the current run and
    /// stops the loop.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tracing::info!(
            "Monitor: checking {} targets every {:?}",
            self.targets.len(),
            self.interval
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let started = Instant::now();
                        // Runs are awaited in place, so they never overlap;
                        // ticks missed meanwhile are skipped.
                        self.run_once(&shutdown).await;

                        if started.elapsed() > self.interval {
                            tracing::warn!(
                                "Monitor: run took {:?}, longer than the {:?} interval; skipping missed ticks",
                                started.elapsed(),
                                self.interval
                            );
                        }
                    }
                }
            }

            tracing::info!("Monitor: stopped");
        })
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Option<BatchRun> {
        let cancel = shutdown.child_token();
        let run = match self.scheduler.run(self.targets.clone(), &mut LogObserver, &cancel).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!("Monitor: batch failed to start: {}", e);
                return None;
            }
        };

        record_run(&self.store, &run);
        Some(run)
    }
}

/// Persist a run, logging instead of failing.
pub fn record_run(store: &Store, run: &BatchRun) {
    if let Err(e) = store.save_run(run) {
        tracing::error!("Failed to save run {}: {}", run.id, e);
    }
}

/// Streams observer callbacks as log lines.
#[derive(Debug, Default)]
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn on_result(&mut self, outcome: &crate::probe::ProbeOutcome) {
        tracing::debug!(
            "{} [{}] {}: {} ({}ms)",
            outcome.target.label,
            outcome.target.index,
            outcome.target.url,
            outcome.state.status_label(),
            outcome.elapsed_ms
        );
    }

    fn on_progress(&mut self, completed: usize, total: usize) {
        tracing::trace!("Progress {}/{}", completed, total);
    }
}
