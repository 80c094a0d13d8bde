//! Storage gateway abstraction.
//!
//! A deployment runs against exactly one backend. Each backend implements
//! [`StorageGateway`] and reports failures through the three-way
//! [`GatewayError`] taxonomy; backend-native errors never cross this seam.

use crate::{
    config::AppConfig,
    models::stored_object::{StoredFile, StoredObject},
    services::{
        bucket_gateway::BucketGateway,
        drive_gateway::{DriveAuth, DriveGateway},
        local_gateway::LocalGateway,
    },
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("upload rejected: {0}")]
    UploadRejected(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Uniform list/upload/download/delete contract over one storage scope.
///
/// Every call is a single best-effort round trip: no retries, no partial
/// recovery.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Every object in the scope, minus backend placeholder entries.
    /// Order is unspecified.
    async fn list(&self) -> GatewayResult<Vec<StoredObject>>;

    /// Store `bytes` under `display_name`.
    async fn upload(
        &self,
        display_name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<StoredObject>;

    /// Full payload of `storage_key` together with its current metadata,
    /// so callers never need a second listing to name or type the bytes.
    async fn download(&self, storage_key: &str) -> GatewayResult<StoredFile>;

    /// Remove `storage_key`. A key that is already gone is `ObjectNotFound`.
    async fn delete(&self, storage_key: &str) -> GatewayResult<()>;

    /// Cheap reachability probe used by the readiness endpoint.
    async fn check(&self) -> GatewayResult<()>;

    fn kind(&self) -> BackendKind;
}

/// Which backend a deployment is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Bucket,
    DriveServiceAccount,
    DriveOauth,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Bucket => "bucket",
            BackendKind::DriveServiceAccount => "drive-service-account",
            BackendKind::DriveOauth => "drive-oauth",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(BackendKind::Local),
            "bucket" => Ok(BackendKind::Bucket),
            "drive-service-account" | "drive" => Ok(BackendKind::DriveServiceAccount),
            "drive-oauth" => Ok(BackendKind::DriveOauth),
            other => anyhow::bail!(
                "unknown backend `{}` (expected local, bucket, drive-service-account or drive-oauth)",
                other
            ),
        }
    }
}

/// Build the single gateway selected by `cfg.backend`.
pub async fn connect(cfg: &AppConfig) -> Result<Arc<dyn StorageGateway>> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);

    let gateway: Arc<dyn StorageGateway> = match cfg.backend {
        BackendKind::Local => Arc::new(
            LocalGateway::open(&cfg.storage_dir)
                .await
                .with_context(|| format!("opening storage directory {}", cfg.storage_dir))?
                .with_max_upload_bytes(cfg.max_upload_bytes),
        ),
        BackendKind::Bucket => Arc::new(
            BucketGateway::connect(&cfg.database_url, &cfg.storage_dir, timeout)
                .await
                .context("connecting bucket backend")?
                .with_max_upload_bytes(cfg.max_upload_bytes),
        ),
        BackendKind::DriveServiceAccount => {
            let folder_id = drive_folder(cfg)?;
            let auth = DriveAuth::service_account_from_file(&cfg.service_account_path)
                .await
                .with_context(|| {
                    format!("loading service account from {}", cfg.service_account_path)
                })?;
            Arc::new(
                DriveGateway::new(auth, folder_id, timeout)?
                    .with_max_upload_bytes(cfg.max_upload_bytes),
            )
        }
        BackendKind::DriveOauth => {
            let folder_id = drive_folder(cfg)?;
            let token = cfg
                .drive_access_token
                .clone()
                .context("drive-oauth backend requires FILE_STORE_DRIVE_ACCESS_TOKEN")?;
            Arc::new(
                DriveGateway::new(DriveAuth::oauth(token), folder_id, timeout)?
                    .with_max_upload_bytes(cfg.max_upload_bytes),
            )
        }
    };

    tracing::info!("storage gateway ready: {}", gateway.kind());
    Ok(gateway)
}

fn drive_folder(cfg: &AppConfig) -> Result<String> {
    cfg.drive_folder_id
        .clone()
        .context("drive backends require FILE_STORE_DRIVE_FOLDER_ID")
}
