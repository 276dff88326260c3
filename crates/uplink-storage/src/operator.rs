//! OpenDAL Operator factory for the upload target

use anyhow::{Context, Result};
use opendal::Operator;

/// S3 credentials for the upload target
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    /// Read credentials from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY,
    /// falling back to the UPLINK_-prefixed names.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("UPLINK_ACCESS_KEY_ID"))
            .context(
                "S3 credentials not set\n\
                 Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
            )?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("UPLINK_SECRET_ACCESS_KEY"))
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Ok(Credentials {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Build an OpenDAL Operator for an S3-compatible endpoint.
///
/// No RetryLayer is installed: retries are owned by the sync engine's
/// attempt accounting, so each upload call is exactly one attempt.
pub fn build_operator(
    storage: &uplink_core::config::StorageConfig,
    creds: &Credentials,
) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Build an operator from the core config + loaded credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &uplink_core::config::StorageConfig,
    creds: &Credentials,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "storage endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "storage endpoint uses plaintext HTTP; set storage.enforce_tls = true in production"
        );
    }

    build_operator(storage, creds)
}
