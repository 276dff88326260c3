//! SyncEngine: the operator-facing facade over the queue.
//!
//! Wires store, processor, status reporter and scheduler together and
//! exposes the operations callers use: enqueue, run_now, status,
//! retry_failed, clear. Every mutation goes through the shared `TaskLedger`,
//! so it is safe to call these while a run is active.

use std::sync::Arc;
use tracing::info;

use uplink_core::config::SyncConfig;
use uplink_core::types::{QueueSnapshot, RunSummary, SyncTask, TaskId, TaskState};
use uplink_core::{UplinkError, UplinkResult};

use crate::clock::Clock;
use crate::network::NetworkMonitor;
use crate::processor::{ProcessorSettings, QueueProcessor, RunObserver};
use crate::retry::RetryPolicy;
use crate::scheduler::{SchedulerHandle, SchedulerSettings, SyncScheduler};
use crate::status::StatusReporter;
use crate::store::{TaskLedger, TaskStore};
use crate::uploader::RemoteUploader;

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub policy: RetryPolicy,
    pub processor: ProcessorSettings,
    pub scheduler: SchedulerSettings,
}

impl EngineSettings {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        EngineSettings {
            policy: RetryPolicy {
                max_attempts: cfg.max_attempts,
                fail_fast_on_permanent: cfg.fail_fast_on_permanent,
            },
            processor: ProcessorSettings {
                batch_size: cfg.batch_size,
                max_batches_per_run: cfg.max_batches_per_run,
                upload_timeout: cfg.upload_timeout(),
                prune_completed: cfg.prune_completed,
            },
            scheduler: SchedulerSettings {
                interval: cfg.sync_interval(),
                settle_delay: cfg.settle_delay(),
            },
        }
    }
}

pub struct SyncEngine {
    ledger: Arc<TaskLedger>,
    uploader: Arc<dyn RemoteUploader>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    processor: Arc<QueueProcessor>,
    reporter: Arc<StatusReporter>,
}

impl SyncEngine {
    pub fn open(
        store: Arc<dyn TaskStore>,
        uploader: Arc<dyn RemoteUploader>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let ledger = Arc::new(TaskLedger::new(store));
        let reporter = Arc::new(StatusReporter::new(ledger.clone()));
        let processor = Arc::new(QueueProcessor::new(
            ledger.clone(),
            uploader.clone(),
            network.clone(),
            clock.clone(),
            settings.policy,
            settings.processor.clone(),
        ));
        SyncEngine {
            ledger,
            uploader,
            network,
            clock,
            settings,
            processor,
            reporter,
        }
    }

    /// Attach a run observer. Must be called before `spawn_scheduler()`;
    /// schedulers started earlier keep the previous processor.
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.processor = Arc::new(
            QueueProcessor::new(
                self.ledger.clone(),
                self.uploader.clone(),
                self.network.clone(),
                self.clock.clone(),
                self.settings.policy,
                self.settings.processor.clone(),
            )
            .with_observer(observer),
        );
        self
    }

    /// Append a new `queued` task and return its id. The task is durable
    /// once this returns.
    pub fn enqueue(&self, kind: &str, payload: serde_json::Value) -> UplinkResult<TaskId> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(UplinkError::InvalidTask("kind must not be empty".into()));
        }
        let task = SyncTask::new(kind, payload, self.clock.now());
        let id = task.id.clone();
        self.ledger.modify(|tasks| tasks.push(task))?;
        info!(task_id = %id, kind, "task enqueued");
        Ok(id)
    }

    /// Run the processor once, bypassing the schedule.
    pub async fn run_now(&self) -> UplinkResult<RunSummary> {
        self.processor.run().await
    }

    pub fn status(&self) -> UplinkResult<QueueSnapshot> {
        self.reporter.snapshot()
    }

    pub fn list(&self) -> UplinkResult<Vec<SyncTask>> {
        self.ledger.load()
    }

    /// Move every `failed` task back to `queued`. Attempt counters are kept,
    /// so each retried task gets exactly one more automatic attempt.
    pub fn retry_failed(&self) -> UplinkResult<usize> {
        let count = self.ledger.modify(|tasks| {
            let mut n = 0;
            for task in tasks.iter_mut().filter(|t| t.state == TaskState::Failed) {
                task.state = TaskState::Queued;
                n += 1;
            }
            n
        })?;
        info!(count, "failed tasks requeued");
        Ok(count)
    }

    /// Drop every task regardless of state.
    pub fn clear(&self) -> UplinkResult<usize> {
        let count = self.ledger.modify(|tasks| {
            let n = tasks.len();
            tasks.clear();
            n
        })?;
        info!(count, "queue cleared");
        Ok(count)
    }

    /// Drop `completed` tasks.
    pub fn prune_completed(&self) -> UplinkResult<usize> {
        let count = self.ledger.modify(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.state != TaskState::Completed);
            before - tasks.len()
        })?;
        info!(count, "completed tasks pruned");
        Ok(count)
    }

    pub fn spawn_scheduler(&self) -> SchedulerHandle {
        SyncScheduler::new(
            self.processor.clone(),
            self.reporter.clone(),
            self.network.clone(),
            self.settings.scheduler.clone(),
        )
        .spawn()
    }
}
