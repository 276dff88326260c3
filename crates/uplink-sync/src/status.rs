//! Queue status snapshots, recomputed from the store on every call

use std::sync::Arc;

use uplink_core::types::{QueueSnapshot, SyncTask, TaskState};
use uplink_core::UplinkResult;

use crate::store::TaskLedger;

pub struct StatusReporter {
    ledger: Arc<TaskLedger>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<TaskLedger>) -> Self {
        StatusReporter { ledger }
    }

    pub fn snapshot(&self) -> UplinkResult<QueueSnapshot> {
        let tasks = self.ledger.load()?;
        Ok(summarize(&tasks, self.ledger.footprint_bytes()))
    }
}

/// Aggregate counts over a task list
pub fn summarize(tasks: &[SyncTask], storage_bytes: u64) -> QueueSnapshot {
    let mut snap = QueueSnapshot {
        total: tasks.len(),
        storage_bytes,
        ..Default::default()
    };
    for task in tasks {
        match task.state {
            TaskState::Queued => snap.pending += 1,
            TaskState::Processing => snap.processing += 1,
            TaskState::Failed => snap.failed += 1,
            TaskState::Completed => snap.completed += 1,
        }
        snap.last_sync_attempt = snap.last_sync_attempt.max(task.last_attempted_at);
    }
    snap
}
