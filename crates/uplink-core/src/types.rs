use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, immutable task identifier (UUID v4, hyphenated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a queued upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for the next processing run
    Queued,
    /// Dispatched to the remote uploader by the active run
    Processing,
    /// Delivered; never processed again
    Completed,
    /// Out of attempts (or rejected as non-retryable); only an operator retry
    /// moves it back to `Queued`
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent attempt, as recorded on the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    /// Identifier of the record created on the remote side, if any
    pub remote_id: Option<String>,
    /// Whether the uploader flagged this failure as non-retryable
    #[serde(default)]
    pub permanent: bool,
}

/// A unit of outbound work awaiting delivery to the remote system.
///
/// Optional fields serialize as explicit `null` so that "never attempted"
/// stays distinguishable from empty values after a round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: TaskId,
    /// Payload discriminator, e.g. `pdf_upload`
    pub kind: String,
    pub payload: serde_json::Value,
    pub state: TaskState,
    pub attempts: u32,
    /// Unix timestamp (seconds) at enqueue time
    pub created_at: u64,
    pub last_attempted_at: Option<u64>,
    pub last_result: Option<TaskResult>,
    /// Set only once `state` is `Completed`
    pub completed_at: Option<u64>,
}

impl SyncTask {
    /// Build a fresh `Queued` task with zero attempts.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, now: u64) -> Self {
        SyncTask {
            id: TaskId::generate(),
            kind: kind.into(),
            payload,
            state: TaskState::Queued,
            attempts: 0,
            created_at: now,
            last_attempted_at: None,
            last_result: None,
            completed_at: None,
        }
    }
}

/// Read-only aggregate view of the queue, recomputed on every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub completed: usize,
    pub total: usize,
    /// Estimated on-disk footprint of the task store in bytes
    pub storage_bytes: u64,
    /// Most recent `last_attempted_at` across all tasks
    pub last_sync_attempt: Option<u64>,
}

/// Summary returned from one processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks dispatched during this run
    pub processed: usize,
    pub succeeded: usize,
    /// Attempts that did not succeed (requeued or moved to `Failed`)
    pub failed: usize,
    /// Tasks still `Queued` when the run ended
    pub remaining: usize,
    /// The run was skipped because the network was offline
    pub network_error: bool,
    /// The run was skipped because another run was active
    pub already_running: bool,
}

impl RunSummary {
    pub fn offline() -> Self {
        RunSummary {
            network_error: true,
            ..Default::default()
        }
    }

    pub fn already_running() -> Self {
        RunSummary {
            already_running: true,
            ..Default::default()
        }
    }
}
