//! Integration test: queue → StorageUploader → in-memory object store
//!
//! Uses OpenDAL's memory backend so no live S3 endpoint is required.

use opendal::Operator;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use uplink_core::types::TaskState;
use uplink_sync::{
    EngineSettings, JsonTaskStore, NetworkStatus, StorageUploader, SyncEngine, SystemClock,
    UploaderRegistry,
};

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

fn engine(op: &Operator, queue: &Path) -> SyncEngine {
    let mut registry = UploaderRegistry::new();
    for kind in ["pdf_upload", "photo_upload"] {
        registry.register(kind, Arc::new(StorageUploader::new(op.clone(), "uploads")));
    }
    SyncEngine::open(
        Arc::new(JsonTaskStore::open(queue)),
        Arc::new(registry),
        Arc::new(NetworkStatus::new(true)),
        Arc::new(SystemClock),
        EngineSettings::default(),
    )
}

#[tokio::test]
async fn queued_files_reach_object_store() {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();
    let pdf = write_test_file(tmp.path(), "delivery-note.pdf", b"%PDF-1.4 delivery note");
    let photo = write_test_file(tmp.path(), "IMG_2001.jpg", b"\xff\xd8\xff jpeg bytes");

    let engine = engine(&op, &tmp.path().join("queue.json"));
    engine
        .enqueue(
            "pdf_upload",
            serde_json::json!({"local_path": pdf, "metadata": {"order": "SO-1009"}}),
        )
        .unwrap();
    engine
        .enqueue(
            "photo_upload",
            serde_json::json!({"local_path": photo, "remote_name": "wo-77-after.jpg"}),
        )
        .unwrap();

    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.succeeded, 2);

    let body = op
        .read("uploads/pdf_upload/delivery-note.pdf")
        .await
        .unwrap()
        .to_vec();
    assert_eq!(body, b"%PDF-1.4 delivery note");
    let body = op
        .read("uploads/photo_upload/wo-77-after.jpg")
        .await
        .unwrap()
        .to_vec();
    assert_eq!(body, b"\xff\xd8\xff jpeg bytes");

    let tasks = engine.list().unwrap();
    assert_eq!(
        tasks[0].last_result.as_ref().unwrap().remote_id.as_deref(),
        Some("uploads/pdf_upload/delivery-note.pdf")
    );
    assert!(tasks.iter().all(|t| t.completed_at.is_some()));
}

#[tokio::test]
async fn unknown_kind_and_missing_file_fail_immediately() {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();
    let engine = engine(&op, &tmp.path().join("queue.json"));

    engine
        .enqueue("video_upload", serde_json::json!({"local_path": "/tmp/x.mp4"}))
        .unwrap();
    engine
        .enqueue(
            "pdf_upload",
            serde_json::json!({"local_path": tmp.path().join("gone.pdf")}),
        )
        .unwrap();

    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.remaining, 0);

    let snap = engine.status().unwrap();
    assert_eq!(snap.failed, 2);
    for task in engine.list().unwrap() {
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 1);
        assert!(task.last_result.unwrap().permanent);
    }
}

#[tokio::test]
async fn file_restored_after_failure_uploads_on_retry() {
    let tmp = TempDir::new().unwrap();
    let op = memory_operator();
    let engine = engine(&op, &tmp.path().join("queue.json"));
    let path = tmp.path().join("late.pdf");

    engine
        .enqueue("pdf_upload", serde_json::json!({"local_path": path}))
        .unwrap();
    engine.run_now().await.unwrap();
    assert_eq!(engine.status().unwrap().failed, 1);

    write_test_file(tmp.path(), "late.pdf", b"now it exists");
    assert_eq!(engine.retry_failed().unwrap(), 1);
    let summary = engine.run_now().await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let task = &engine.list().unwrap()[0];
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.attempts, 2);
}
