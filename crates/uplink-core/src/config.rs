use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{UplinkError, UplinkResult};

/// Top-level configuration (loaded from uplink.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP address for metrics, health and control endpoints (default: 127.0.0.1:9180)
    pub listen_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint of the system of record
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket receiving uploads
    pub bucket: String,
    /// Key prefix under which uploads land
    pub remote_prefix: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// JSON file holding the persisted queue
    pub queue_path: PathBuf,
    /// Attempts before a task is moved to `failed`
    pub max_attempts: u32,
    /// Tasks dispatched concurrently per batch
    pub batch_size: usize,
    /// Cap on batches per run (unset = drain every queued task)
    pub max_batches_per_run: Option<usize>,
    /// Periodic sync interval while online
    pub sync_interval_secs: u64,
    /// Wait after connectivity returns before syncing
    pub settle_delay_secs: u64,
    /// Per-task upload timeout
    pub upload_timeout_secs: u64,
    /// How often the daemon probes storage reachability
    pub probe_interval_secs: u64,
    /// Drop completed tasks from the store instead of retaining them
    pub prune_completed: bool,
    /// Move non-retryable failures straight to `failed`
    pub fail_fast_on_permanent: bool,
    /// Task kinds accepted by the storage uploader
    pub upload_kinds: Vec<String>,
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> UplinkResult<()> {
        if self.batch_size == 0 {
            return Err(UplinkError::Config("sync.batch_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(UplinkError::Config("sync.max_attempts must be at least 1".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(UplinkError::Config(
                "sync.sync_interval_secs must be at least 1".into(),
            ));
        }
        if self.upload_timeout_secs == 0 {
            return Err(UplinkError::Config(
                "sync.upload_timeout_secs must be at least 1".into(),
            ));
        }
        if self.probe_interval_secs == 0 {
            return Err(UplinkError::Config(
                "sync.probe_interval_secs must be at least 1".into(),
            ));
        }
        if self.max_batches_per_run == Some(0) {
            return Err(UplinkError::Config(
                "sync.max_batches_per_run must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: Some("127.0.0.1:9180".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "uplink".into(),
            remote_prefix: "uploads".into(),
            enforce_tls: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from("~/.local/share/uplink/queue.json"),
            max_attempts: 3,
            batch_size: 5,
            max_batches_per_run: None,
            sync_interval_secs: 30,
            settle_delay_secs: 5,
            upload_timeout_secs: 30,
            probe_interval_secs: 10,
            prune_completed: false,
            fail_fast_on_permanent: true,
            upload_kinds: vec!["pdf_upload".into(), "photo_upload".into()],
        }
    }
}

impl UplinkConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(s: &str) -> UplinkResult<Self> {
        let config: UplinkConfig =
            toml::from_str(s).map_err(|e| UplinkError::Config(e.to_string()))?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Load from `path`, or return `None` when the file does not exist.
    pub fn load(path: &Path) -> UplinkResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map(Some)
            .map_err(|e| UplinkError::Config(format!("{}: {e}", path.display())))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        path.to_path_buf()
    }
}
