//! Scheduler module for running probe batches.
//!
//! A batch drains a queue of targets through a fixed window of in-flight
//! probes: whenever one settles the next queued target is dispatched, so the
//! window stays full until the queue runs dry.

mod history;
mod monitor;

pub use history::*;
pub use monitor::*;

use crate::probe::{probe, ProbeConfig, ProbeOutcome, Target, Transport};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default number of probes in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Scheduler error types.
#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError {
    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidConcurrency(usize),
}

/// Options for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOptions {
    pub concurrency_limit: usize,
    pub probe: ProbeConfig,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            probe: ProbeConfig::default(),
        }
    }
}

/// Receives results as a batch makes progress.
///
/// Both methods are called from the task driving the batch, once per settled
/// probe: `on_result` first, then `on_progress`.
pub trait BatchObserver: Send {
    fn on_result(&mut self, _outcome: &ProbeOutcome) {}

    fn on_progress(&mut self, _completed: usize, _total: usize) {}
}

impl BatchObserver for () {}

/// One execution of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub targets: Vec<Target>,
    pub outcomes: Vec<ProbeOutcome>,
    pub concurrency_limit: usize,
    pub cancelled: bool,
}

impl BatchRun {
    fn new(targets: Vec<Target>, concurrency_limit: usize) -> Self {
        Self {
            id: format!("{:016x}", rand::random::<u64>()),
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::with_capacity(targets.len()),
            targets,
            concurrency_limit,
            cancelled: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.targets.len()
    }

    pub fn online_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.state.is_online()).count()
    }

    pub fn offline_count(&self) -> usize {
        self.outcomes.len() - self.online_count()
    }
}

/// Runs batches of probes over a shared transport.
///
/// Holds no per-run state; every call to [`BatchScheduler::run`] owns its
/// queue and in-flight set.
#[derive(Clone)]
pub struct BatchScheduler {
    transport: Arc<dyn Transport>,
    options: BatchOptions,
}

impl BatchScheduler {
    pub fn new(transport: Arc<dyn Transport>, options: BatchOptions) -> Self {
        Self { transport, options }
    }

    /// Probe every target once, at most `concurrency_limit` at a time.
    ///
    /// Outcomes arrive in completion order. Cancelling `cancel` stops further
    /// dispatches, settles in-flight probes as timed out and returns once they
    /// have drained; undispatched targets get no outcome.
    pub async fn run<O: BatchObserver>(
        &self,
        targets: Vec<Target>,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<BatchRun, SchedulerError> {
        let limit = self.options.concurrency_limit;
        if limit == 0 {
            return Err(SchedulerError::InvalidConcurrency(limit));
        }

        let total = targets.len();
        let mut run = BatchRun::new(targets, limit);
        let mut queue: VecDeque<Target> = run.targets.iter().cloned().collect();
        let mut in_flight = JoinSet::new();

        tracing::info!(
            "Batch {}: probing {} targets (concurrency {}, timeout {:?})",
            run.id,
            total,
            limit,
            self.options.probe.timeout
        );

        loop {
            while in_flight.len() < limit && !cancel.is_cancelled() {
                let Some(target) = queue.pop_front() else {
                    break;
                };

                let transport = self.transport.clone();
                let config = self.options.probe;
                let cancel = cancel.clone();

                in_flight.spawn(async move { probe(&target, transport.as_ref(), &config, &cancel).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(outcome) => {
                    observer.on_result(&outcome);
                    run.outcomes.push(outcome);
                    observer.on_progress(run.outcomes.len(), total);
                }
                Err(e) => {
                    tracing::error!("Batch {}: probe task failed: {}", run.id, e);
                }
            }
        }

        run.cancelled = cancel.is_cancelled();
        run.completed_at = Some(Utc::now());

        if run.cancelled && run.is_complete() {
            tracing::info!("Batch {} cancelled after every target settled", run.id);
        } else if run.cancelled {
            tracing::info!(
                "Batch {} cancelled: {} of {} probed, {} never dispatched",
                run.id,
                run.outcomes.len(),
                total,
                queue.len()
            );
        } else {
            tracing::info!(
                "Batch {} finished: {} online, {} offline",
                run.id,
                run.online_count(),
                run.offline_count()
            );
        }

        Ok(run)
    }
}
