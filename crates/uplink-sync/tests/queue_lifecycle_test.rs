//! Integration test: task lifecycle through the SyncEngine facade
//!
//! Exercises batching, bounded retries, operator actions and the offline
//! short-circuit against a JSON queue file on disk.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use uplink_core::types::{SyncTask, TaskState};
use uplink_core::UplinkResult;
use uplink_sync::{
    EngineSettings, JsonTaskStore, ManualClock, MemoryTaskStore, NetworkStatus, ProcessorSettings,
    RemoteUploader, RetryPolicy, SyncEngine, TaskStore, UploadOutcome,
};

/// Fails every call and counts them
#[derive(Default)]
struct AlwaysFail {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteUploader for AlwaysFail {
    async fn upload(&self, _: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UploadOutcome::failure("HTTP 503 Service Unavailable"))
    }
}

/// Succeeds on every call
struct AlwaysOk;

#[async_trait]
impl RemoteUploader for AlwaysOk {
    async fn upload(&self, kind: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
        Ok(UploadOutcome::success(format!("{kind}-remote"), "accepted"))
    }
}

fn settings(max_batches_per_run: Option<usize>) -> EngineSettings {
    EngineSettings {
        policy: RetryPolicy::new(3),
        processor: ProcessorSettings {
            batch_size: 5,
            max_batches_per_run,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn open(
    store: Arc<dyn TaskStore>,
    uploader: Arc<dyn RemoteUploader>,
    online: bool,
    settings: EngineSettings,
) -> SyncEngine {
    SyncEngine::open(
        store,
        uploader,
        Arc::new(NetworkStatus::new(online)),
        Arc::new(ManualClock::new(1_700_000_000)),
        settings,
    )
}

fn enqueue_n(engine: &SyncEngine, n: usize) {
    for i in 0..n {
        engine
            .enqueue("pdf_upload", serde_json::json!({"seq": i}))
            .expect("enqueue");
    }
}

#[tokio::test]
async fn single_batch_run_leaves_rest_untouched() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = open(store.clone(), Arc::new(AlwaysFail::default()), true, settings(Some(1)));
    enqueue_n(&engine, 7);

    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 5);
    assert_eq!(summary.remaining, 7);
    assert!(!summary.network_error);

    let tasks = store.load().unwrap();
    assert!(tasks.iter().all(|t| t.state == TaskState::Queued));
    assert!(tasks[..5].iter().all(|t| t.attempts == 1));
    assert!(tasks[5..].iter().all(|t| t.attempts == 0));
    assert!(tasks[5..].iter().all(|t| t.last_attempted_at.is_none()));
}

#[tokio::test]
async fn always_failing_tasks_fail_after_budget() {
    let store = Arc::new(MemoryTaskStore::new());
    let uploader = Arc::new(AlwaysFail::default());
    let engine = open(store.clone(), uploader.clone(), true, settings(None));
    enqueue_n(&engine, 7);

    for run in 1..=3 {
        let summary = engine.run_now().await.unwrap();
        assert_eq!(summary.processed, 7, "run {run}");
    }

    let tasks = store.load().unwrap();
    assert!(tasks.iter().all(|t| t.state == TaskState::Failed));
    assert!(tasks.iter().all(|t| t.attempts == 3));
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 21);

    // Failed tasks are never picked up automatically
    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 21);

    let snap = engine.status().unwrap();
    assert_eq!(snap.failed, 7);
    assert_eq!(snap.pending, 0);
}

#[tokio::test]
async fn retry_failed_requeues_with_attempts_kept() {
    let failed: Vec<SyncTask> = (0..4)
        .map(|_| {
            let mut t = SyncTask::new("photo_upload", serde_json::json!({}), 10);
            t.state = TaskState::Failed;
            t.attempts = 3;
            t
        })
        .collect();
    let store = Arc::new(MemoryTaskStore::with_tasks(failed));
    let uploader = Arc::new(AlwaysFail::default());
    let engine = open(store.clone(), uploader.clone(), true, settings(None));

    assert_eq!(engine.retry_failed().unwrap(), 4);
    let tasks = store.load().unwrap();
    assert!(tasks.iter().all(|t| t.state == TaskState::Queued && t.attempts == 3));

    // One more attempt each, then straight back to failed
    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(uploader.calls.load(Ordering::SeqCst), 4);
    let tasks = store.load().unwrap();
    assert!(tasks.iter().all(|t| t.state == TaskState::Failed && t.attempts == 4));
}

#[tokio::test]
async fn offline_run_leaves_queue_file_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("queue.json");
    let store = Arc::new(JsonTaskStore::open(&path));
    let engine = open(store, Arc::new(AlwaysOk), false, settings(None));
    enqueue_n(&engine, 3);

    let before = std::fs::read(&path).unwrap();
    let summary = engine.run_now().await.unwrap();
    assert!(summary.network_error);
    assert_eq!(summary.processed, 0);
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn completed_tasks_are_never_touched_again() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("queue.json");
    let engine = open(
        Arc::new(JsonTaskStore::open(&path)),
        Arc::new(AlwaysOk),
        true,
        settings(None),
    );
    enqueue_n(&engine, 2);
    engine.run_now().await.unwrap();
    let delivered = engine.list().unwrap();
    assert!(delivered.iter().all(|t| t.state == TaskState::Completed));

    enqueue_n(&engine, 1);
    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.processed, 1);

    let tasks = engine.list().unwrap();
    assert_eq!(&tasks[..2], &delivered[..]);
    assert_eq!(tasks[2].state, TaskState::Completed);
}

#[tokio::test]
async fn processing_task_on_disk_is_resumed_after_restart() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("queue.json");

    let mut stuck = SyncTask::new("pdf_upload", serde_json::json!({"seq": 0}), 5);
    stuck.state = TaskState::Processing;
    stuck.attempts = 1;
    stuck.last_attempted_at = Some(6);
    JsonTaskStore::open(&path).save(&[stuck.clone()]).unwrap();

    // Fresh process: new store handle, new engine
    let engine = open(
        Arc::new(JsonTaskStore::open(&path)),
        Arc::new(AlwaysOk),
        true,
        settings(None),
    );
    assert_eq!(engine.status().unwrap().processing, 1);

    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);

    let task = &engine.list().unwrap()[0];
    assert_eq!(task.id, stuck.id);
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn permanent_failure_skips_remaining_attempts() {
    struct Rejecting;

    #[async_trait]
    impl RemoteUploader for Rejecting {
        async fn upload(&self, _: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
            Ok(UploadOutcome::permanent_failure("HTTP 422 unprocessable"))
        }
    }

    let store = Arc::new(MemoryTaskStore::new());
    let engine = open(store.clone(), Arc::new(Rejecting), true, settings(None));
    enqueue_n(&engine, 1);
    engine.run_now().await.unwrap();

    let task = &store.load().unwrap()[0];
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 1);
    assert!(task.last_result.as_ref().unwrap().permanent);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// attempts always equals the number of upload calls made for a task,
    /// and never exceeds the budget
    #[test]
    fn attempts_match_upload_calls(
        outcomes in proptest::collection::vec(any::<bool>(), 1..8),
        max_attempts in 1u32..5,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        struct Scripted {
            outcomes: Vec<bool>,
            next: AtomicUsize,
        }

        #[async_trait]
        impl RemoteUploader for Scripted {
            async fn upload(&self, _: &str, _: &serde_json::Value) -> UplinkResult<UploadOutcome> {
                let i = self.next.fetch_add(1, Ordering::SeqCst);
                if self.outcomes.get(i).copied().unwrap_or(false) {
                    Ok(UploadOutcome::success("ok", "ok"))
                } else {
                    Ok(UploadOutcome::failure("nope"))
                }
            }
        }

        let uploader = Arc::new(Scripted { outcomes: outcomes.clone(), next: AtomicUsize::new(0) });
        let store = Arc::new(MemoryTaskStore::new());
        let engine = open(
            store.clone(),
            uploader.clone(),
            true,
            EngineSettings { policy: RetryPolicy::new(max_attempts), ..Default::default() },
        );
        enqueue_n(&engine, 1);

        rt.block_on(async {
            for _ in 0..=max_attempts {
                engine.run_now().await.unwrap();
            }
        });

        let task = &store.load().unwrap()[0];
        let calls = uploader.next.load(Ordering::SeqCst) as u32;
        prop_assert_eq!(task.attempts, calls);
        prop_assert!(task.attempts <= max_attempts);
        prop_assert!(matches!(task.state, TaskState::Completed | TaskState::Failed));

        let first_success = outcomes.iter().position(|ok| *ok).map(|i| i as u32 + 1);
        match first_success {
            Some(n) if n <= max_attempts => {
                prop_assert_eq!(task.state, TaskState::Completed);
                prop_assert_eq!(task.attempts, n);
            }
            _ => {
                prop_assert_eq!(task.state, TaskState::Failed);
                prop_assert_eq!(task.attempts, max_attempts);
            }
        }
    }
}
