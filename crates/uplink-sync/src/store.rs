//! Durable task store: the single source of truth for queue contents.
//!
//! Two backends are available:
//!   - **JSON** (default): the whole queue is one pretty-printed array, written
//!     atomically via temp file + rename.
//!   - **Memory**: process-local, for tests and one-shot tooling.
//!
//! Both implement `TaskStore`. Callers that modify the queue go through
//! `TaskLedger`, which serialises read-modify-write cycles so concurrent
//! operator actions and batch persists cannot lose each other's updates.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uplink_core::types::SyncTask;
use uplink_core::{UplinkError, UplinkResult};

/// Backend holding the ordered task list
pub trait TaskStore: Send + Sync {
    /// Load every task in insertion order. Missing or empty backing storage
    /// yields an empty list.
    fn load(&self) -> UplinkResult<Vec<SyncTask>>;
    /// Replace the persisted list. On error nothing may be assumed durable.
    fn save(&self, tasks: &[SyncTask]) -> UplinkResult<()>;
    /// Estimated footprint of the persisted queue in bytes
    fn footprint_bytes(&self) -> u64;
}

// ── JSON backend ─────────────────────────────────────────────────────────────

/// Queue persisted as a JSON array on disk
pub struct JsonTaskStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn open(path: &Path) -> Self {
        JsonTaskStore {
            path: path.to_path_buf(),
            io_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> UplinkResult<std::sync::MutexGuard<'_, ()>> {
        self.io_lock
            .lock()
            .map_err(|_| UplinkError::persistence("task store lock poisoned"))
    }
}

impl TaskStore for JsonTaskStore {
    fn load(&self) -> UplinkResult<Vec<SyncTask>> {
        let _guard = self.lock()?;

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(UplinkError::Persistence(format!(
                    "reading task store {}: {e}",
                    self.path.display()
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            UplinkError::Persistence(format!("parsing task store {}: {e}", self.path.display()))
        })
    }

    fn save(&self, tasks: &[SyncTask]) -> UplinkResult<()> {
        let _guard = self.lock()?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    UplinkError::Persistence(format!(
                        "creating task store dir {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(tasks)
            .map_err(|e| UplinkError::Persistence(format!("serializing task store: {e}")))?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| {
            UplinkError::Persistence(format!(
                "writing task store temp {}: {e}",
                tmp_path.display()
            ))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            UplinkError::Persistence(format!("renaming task store {}: {e}", self.path.display()))
        })?;

        tracing::trace!(path = %self.path.display(), tasks = tasks.len(), "task store saved");
        Ok(())
    }

    fn footprint_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

// ── Memory backend ───────────────────────────────────────────────────────────

/// In-process store. `set_fail_saves(true)` makes every save fail, which
/// lets callers exercise the persistence-failure path.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<SyncTask>>,
    fail_saves: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<SyncTask>) -> Self {
        MemoryTaskStore {
            tasks: Mutex::new(tasks),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self) -> UplinkResult<Vec<SyncTask>> {
        self.tasks
            .lock()
            .map(|t| t.clone())
            .map_err(|_| UplinkError::persistence("memory store lock poisoned"))
    }

    fn save(&self, tasks: &[SyncTask]) -> UplinkResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(UplinkError::persistence("memory store: save rejected"));
        }
        let mut guard = self
            .tasks
            .lock()
            .map_err(|_| UplinkError::persistence("memory store lock poisoned"))?;
        *guard = tasks.to_vec();
        Ok(())
    }

    fn footprint_bytes(&self) -> u64 {
        self.tasks
            .lock()
            .ok()
            .and_then(|t| serde_json::to_vec(&*t).ok())
            .map(|v| v.len() as u64)
            .unwrap_or(0)
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// Single-writer front for a `TaskStore`.
///
/// Every mutation is a load → modify → save cycle performed while holding
/// the ledger's write lock. Reads never take the lock.
pub struct TaskLedger {
    store: Arc<dyn TaskStore>,
    write_lock: Mutex<()>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        TaskLedger {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> UplinkResult<Vec<SyncTask>> {
        self.store.load()
    }

    pub fn footprint_bytes(&self) -> u64 {
        self.store.footprint_bytes()
    }

    /// Apply `f` to the persisted list and save the result. If the save
    /// fails the error is returned and `f`'s return value is discarded.
    pub fn modify<R>(&self, f: impl FnOnce(&mut Vec<SyncTask>) -> R) -> UplinkResult<R> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| UplinkError::persistence("task ledger lock poisoned"))?;
        let mut tasks = self.store.load()?;
        let out = f(&mut tasks);
        self.store.save(&tasks)?;
        Ok(out)
    }
}
