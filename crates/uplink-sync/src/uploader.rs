//! Remote uploaders: the network side of a single task attempt.
//!
//! `RemoteUploader` is the seam the processor calls. Implementations must be
//! safe to call repeatedly for the same task; a retry after a lost response
//! may create a duplicate remote record, which the surrounding system accepts.

use async_trait::async_trait;
use opendal::Operator;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use uplink_core::UplinkResult;

/// Result of one upload call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub remote_id: Option<String>,
    pub message: String,
    /// `false` when repeating the call cannot succeed (bad payload, rejected)
    pub retryable: bool,
}

impl UploadOutcome {
    pub fn success(remote_id: impl Into<String>, message: impl Into<String>) -> Self {
        UploadOutcome {
            success: true,
            remote_id: Some(remote_id.into()),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        UploadOutcome {
            success: false,
            remote_id: None,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent_failure(message: impl Into<String>) -> Self {
        UploadOutcome {
            success: false,
            remote_id: None,
            message: message.into(),
            retryable: false,
        }
    }
}

#[async_trait]
pub trait RemoteUploader: Send + Sync {
    /// Deliver one task. `Err` is treated exactly like a retryable failure.
    async fn upload(&self, kind: &str, payload: &serde_json::Value) -> UplinkResult<UploadOutcome>;
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Routes each task `kind` to the uploader registered for it
#[derive(Default, Clone)]
pub struct UploaderRegistry {
    uploaders: HashMap<String, Arc<dyn RemoteUploader>>,
}

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the uploader for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, uploader: Arc<dyn RemoteUploader>) {
        self.uploaders.insert(kind.into(), uploader);
    }

    pub fn len(&self) -> usize {
        self.uploaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaders.is_empty()
    }
}

#[async_trait]
impl RemoteUploader for UploaderRegistry {
    async fn upload(&self, kind: &str, payload: &serde_json::Value) -> UplinkResult<UploadOutcome> {
        match self.uploaders.get(kind) {
            Some(uploader) => uploader.upload(kind, payload).await,
            None => Ok(UploadOutcome::permanent_failure(format!(
                "no uploader registered for kind '{kind}'"
            ))),
        }
    }
}

// ── Storage uploader ─────────────────────────────────────────────────────────

/// Payload understood by `StorageUploader`
#[derive(Debug, Deserialize)]
struct FilePayload {
    /// Local file to deliver
    local_path: PathBuf,
    /// Object name on the remote side (default: the local file name)
    #[serde(default)]
    remote_name: Option<String>,
    /// Business identifiers stored next to the object
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Uploads the file referenced by a task's payload through OpenDAL.
///
/// Objects land at `{prefix}/{kind}/{remote_name}`; the key doubles as the
/// returned remote id, so repeated attempts overwrite rather than duplicate.
pub struct StorageUploader {
    op: Operator,
    prefix: String,
}

impl StorageUploader {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        StorageUploader {
            op,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn object_key(&self, kind: &str, name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{kind}/{name}")
        } else {
            format!("{}/{kind}/{name}", self.prefix)
        }
    }
}

#[async_trait]
impl RemoteUploader for StorageUploader {
    async fn upload(&self, kind: &str, payload: &serde_json::Value) -> UplinkResult<UploadOutcome> {
        let payload: FilePayload = match serde_json::from_value(payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return Ok(UploadOutcome::permanent_failure(format!(
                    "malformed {kind} payload: {e}"
                )))
            }
        };

        let name = match payload.remote_name.clone().or_else(|| {
            payload
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        }) {
            Some(n) if !n.is_empty() => n,
            _ => {
                return Ok(UploadOutcome::permanent_failure(format!(
                    "cannot derive remote name from {}",
                    payload.local_path.display()
                )))
            }
        };

        let bytes = match tokio::fs::read(&payload.local_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(UploadOutcome::permanent_failure(format!(
                    "local file missing: {}",
                    payload.local_path.display()
                )))
            }
            Err(e) => {
                return Ok(UploadOutcome::failure(format!(
                    "reading {}: {e}",
                    payload.local_path.display()
                )))
            }
        };
        let size = bytes.len();

        let key = self.object_key(kind, &name);
        if let Err(e) = self.op.write(&key, bytes).await {
            return Ok(UploadOutcome::failure(format!("writing {key}: {e}")));
        }

        if let Some(meta) = payload.metadata {
            let meta_key = format!("{key}.meta.json");
            let body = serde_json::to_vec(&meta)
                .map_err(|e| uplink_core::UplinkError::Upload(format!("encoding metadata: {e}")))?;
            if let Err(e) = self.op.write(&meta_key, body).await {
                return Ok(UploadOutcome::failure(format!("writing {meta_key}: {e}")));
            }
        }

        debug!(kind, key = %key, bytes = size, "upload stored");
        Ok(UploadOutcome::success(key, format!("stored {size} bytes")))
    }
}
