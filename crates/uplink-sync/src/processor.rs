//! Queue processor: one call to `run()` is one processing run.
//!
//! A run loads the queue, requeues tasks an interrupted run left in
//! `processing`, then dispatches `queued` tasks in fixed-size batches. Tasks
//! inside a batch are uploaded concurrently, each with its own timeout; the
//! batch settles completely before the next one starts. Task state is
//! persisted before and after every batch, so a crash loses at most the
//! in-flight batch.
//!
//! Only one run may be active per processor. The guard is released on every
//! exit path, including persistence errors.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use uplink_core::types::{RunSummary, SyncTask, TaskId, TaskResult, TaskState};
use uplink_core::{UplinkError, UplinkResult};

use crate::clock::Clock;
use crate::network::NetworkMonitor;
use crate::retry::RetryPolicy;
use crate::store::TaskLedger;
use crate::uploader::{RemoteUploader, UploadOutcome};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Tasks dispatched concurrently per batch
    pub batch_size: usize,
    /// Stop after this many batches (None = drain the queue)
    pub max_batches_per_run: Option<usize>,
    pub upload_timeout: Duration,
    /// Drop completed tasks when persisting
    pub prune_completed: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            batch_size: 5,
            max_batches_per_run: None,
            upload_timeout: Duration::from_secs(30),
            prune_completed: false,
        }
    }
}

/// Notified after every run that got past the guards or failed
pub trait RunObserver: Send + Sync {
    fn run_finished(&self, summary: &RunSummary);
    fn run_failed(&self, error: &UplinkError);
}

/// Holds the single-run flag; clears it when dropped
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct QueueProcessor {
    ledger: Arc<TaskLedger>,
    uploader: Arc<dyn RemoteUploader>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    settings: ProcessorSettings,
    active: AtomicBool,
    observer: Option<Arc<dyn RunObserver>>,
}

impl QueueProcessor {
    pub fn new(
        ledger: Arc<TaskLedger>,
        uploader: Arc<dyn RemoteUploader>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        settings: ProcessorSettings,
    ) -> Self {
        QueueProcessor {
            ledger,
            uploader,
            network,
            clock,
            policy,
            settings,
            active: AtomicBool::new(false),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Execute one processing run.
    ///
    /// Returns immediately with `already_running` if another run holds the
    /// guard, or with `network_error` (and no store access) when offline.
    pub async fn run(&self) -> UplinkResult<RunSummary> {
        let Some(_guard) = RunGuard::acquire(&self.active) else {
            debug!("sync run already active, skipping");
            return Ok(RunSummary::already_running());
        };

        if !self.network.is_online() {
            info!("offline, sync run skipped");
            return Ok(RunSummary::offline());
        }

        let result = self.run_batches().await;
        if let Some(observer) = &self.observer {
            match &result {
                Ok(summary) => observer.run_finished(summary),
                Err(e) => observer.run_failed(e),
            }
        }
        if let Err(e) = &result {
            warn!(error = %e, "sync run aborted");
        }
        result
    }

    async fn run_batches(&self) -> UplinkResult<RunSummary> {
        let mut working = self.ledger.load()?;

        if working.iter().any(|t| t.state == TaskState::Processing) {
            let (tasks, recovered) = self.ledger.modify(|tasks| {
                let mut recovered = 0usize;
                for task in tasks.iter_mut().filter(|t| t.state == TaskState::Processing) {
                    task.state = TaskState::Queued;
                    recovered += 1;
                }
                (tasks.clone(), recovered)
            })?;
            warn!(recovered, "requeued tasks left in processing by an interrupted run");
            working = tasks;
        }

        // Never-attempted tasks first, then least recently attempted, so a
        // capped run cannot starve the tail of the queue.
        let mut selected: Vec<usize> = working
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TaskState::Queued)
            .map(|(i, _)| i)
            .collect();
        selected.sort_by_key(|&i| working[i].last_attempted_at);

        let mut summary = RunSummary::default();
        let mut remaining = selected.len();
        let batch_size = self.settings.batch_size.max(1);
        let max_batches = self.settings.max_batches_per_run.unwrap_or(usize::MAX);

        for (n, batch) in selected.chunks(batch_size).take(max_batches).enumerate() {
            debug!(batch = n + 1, tasks = batch.len(), "dispatching batch");
            remaining = self.process_batch(&mut working, batch, &mut summary).await?;
        }

        summary.remaining = remaining;

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            remaining = summary.remaining,
            "sync run complete"
        );
        Ok(summary)
    }

    /// Upload one batch and record its outcomes. Returns the number of queued
    /// tasks left in the persisted queue afterwards.
    async fn process_batch(
        &self,
        working: &mut [SyncTask],
        batch: &[usize],
        summary: &mut RunSummary,
    ) -> UplinkResult<usize> {
        let started = self.clock.now();
        let claimed = self.claim(working, batch, started)?;
        let batch: Vec<usize> = batch
            .iter()
            .copied()
            .filter(|&i| claimed.contains(&working[i].id))
            .collect();
        for &i in &batch {
            working[i].state = TaskState::Processing;
            working[i].last_attempted_at = Some(started);
        }

        let timeout = self.settings.upload_timeout;
        let handles = batch.iter().map(|&i| {
            let uploader = self.uploader.clone();
            let kind = working[i].kind.clone();
            let payload = working[i].payload.clone();
            tokio::spawn(async move { attempt(uploader, kind, payload, timeout).await })
        });
        let joined = futures::future::join_all(handles).await;

        for (&i, result) in batch.iter().zip(joined) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => UploadOutcome::failure(format!("upload task aborted: {e}")),
            };
            self.record(&mut working[i], outcome, summary);
        }

        self.persist(working, &batch)
    }

    /// Mark the batch's tasks `processing` in the persisted queue.
    ///
    /// Only tasks still present and still `queued` are claimed; anything
    /// cleared or changed since the run loaded the queue is left alone.
    fn claim(
        &self,
        working: &[SyncTask],
        batch: &[usize],
        started: u64,
    ) -> UplinkResult<HashSet<TaskId>> {
        let wanted: HashSet<&TaskId> = batch.iter().map(|&i| &working[i].id).collect();

        let claimed = self.ledger.modify(|persisted| {
            let mut claimed = HashSet::new();
            for slot in persisted
                .iter_mut()
                .filter(|t| t.state == TaskState::Queued && wanted.contains(&t.id))
            {
                slot.state = TaskState::Processing;
                slot.last_attempted_at = Some(started);
                claimed.insert(slot.id.clone());
            }
            claimed
        })?;

        if claimed.len() < batch.len() {
            info!(
                skipped = batch.len() - claimed.len(),
                "tasks removed from the queue mid-run were not dispatched"
            );
        }
        Ok(claimed)
    }

    fn record(&self, task: &mut SyncTask, outcome: UploadOutcome, summary: &mut RunSummary) {
        task.attempts += 1;
        let next = self.policy.next_state(task.attempts, &outcome);
        let message = outcome.message.clone();

        task.last_result = Some(TaskResult {
            success: outcome.success,
            message: outcome.message,
            remote_id: outcome.remote_id,
            permanent: !outcome.success && !outcome.retryable,
        });
        task.state = next;
        summary.processed += 1;

        match next {
            TaskState::Completed => {
                task.completed_at = Some(self.clock.now());
                summary.succeeded += 1;
                info!(task_id = %task.id, kind = %task.kind, attempts = task.attempts, "task delivered");
            }
            TaskState::Failed => {
                summary.failed += 1;
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    attempts = task.attempts,
                    error = %message,
                    "task failed permanently"
                );
            }
            _ => {
                summary.failed += 1;
                warn!(
                    task_id = %task.id,
                    kind = %task.kind,
                    attempts = task.attempts,
                    error = %message,
                    "task attempt failed, requeued"
                );
            }
        }
    }

    /// Merge the run's copy of the touched tasks into the persisted queue
    /// and return how many tasks it still holds in `queued`.
    ///
    /// Tasks enqueued since the run started are kept; tasks cleared since the
    /// run started stay cleared.
    fn persist(&self, working: &[SyncTask], touched: &[usize]) -> UplinkResult<usize> {
        let updates: HashMap<&TaskId, &SyncTask> =
            touched.iter().map(|&i| (&working[i].id, &working[i])).collect();
        let prune = self.settings.prune_completed;

        self.ledger.modify(|persisted| {
            for slot in persisted.iter_mut() {
                if let Some(task) = updates.get(&slot.id) {
                    *slot = (*task).clone();
                }
            }
            if prune {
                persisted.retain(|t| t.state != TaskState::Completed);
            }
            persisted
                .iter()
                .filter(|t| t.state == TaskState::Queued)
                .count()
        })
    }
}

async fn attempt(
    uploader: Arc<dyn RemoteUploader>,
    kind: String,
    payload: serde_json::Value,
    timeout: Duration,
) -> UploadOutcome {
    match tokio::time::timeout(timeout, uploader.upload(&kind, &payload)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => UploadOutcome::failure(e.to_string()),
        Err(_) => UploadOutcome::failure(format!(
            "upload timed out after {}s",
            timeout.as_secs()
        )),
    }
}
