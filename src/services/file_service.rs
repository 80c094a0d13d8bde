//! src/services/file_service.rs
//!
//! FileService: what a user action actually does on top of the gateway.
//!
//! The gateway reports failures faithfully; this layer decides how each one
//! is surfaced: an unreachable backend becomes an empty listing with a
//! warning, a rejected file in a batch does not stop the rest, and deleting
//! something already gone counts as done. Nothing is retried, and every
//! action is one gateway call.

use crate::{
    models::{
        stored_object::{StoredFile, content_type_or_default},
        view::{ListingView, PreviewKind, TextKind},
    },
    services::{
        gateway::{GatewayError, GatewayResult, StorageGateway},
        presenter,
    },
};
use bytes::Bytes;
use moka::sync::Cache;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// How many batch ids are remembered, and for how long.
const MAX_TRACKED_BATCHES: u64 = 4096;
const BATCH_MEMORY: Duration = Duration::from_secs(60 * 60);

/// One file taken from an upload form.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub name: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Per-file result of a batch upload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadOutcome {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    /// The batch id was seen before and nothing was uploaded.
    pub skipped: bool,
    pub results: Vec<UploadOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.ok).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// What the preview action can show for a file.
#[derive(Debug, Clone)]
pub enum Preview {
    Image {
        content_type: String,
        bytes: Bytes,
    },
    Text {
        sub_kind: TextKind,
        language: Option<&'static str>,
        content: String,
    },
    /// Shown as a hint to download instead.
    Document { display_name: String },
    /// Text-like file whose bytes are not valid UTF-8.
    Unreadable { reason: String },
    Unsupported,
}

#[derive(Clone)]
pub struct FileService {
    gateway: Arc<dyn StorageGateway>,
    /// Recently processed batch ids. Re-submitting the same form (page
    /// reload, double click) must not upload twice. Bounded in size and age.
    processed_batches: Cache<String, ()>,
}

impl FileService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        Self::with_batch_memory(gateway, MAX_TRACKED_BATCHES, BATCH_MEMORY)
    }

    /// Remember at most `capacity` batch ids, each for at most `ttl`.
    pub fn with_batch_memory(gateway: Arc<dyn StorageGateway>, capacity: u64, ttl: Duration) -> Self {
        Self {
            gateway,
            processed_batches: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn StorageGateway> {
        &self.gateway
    }

    /// Listing view for the whole scope. Never fails: backend errors yield
    /// an empty view carrying a warning.
    pub async fn listing(&self) -> ListingView {
        match self.gateway.list().await {
            Ok(objects) => presenter::present(objects),
            Err(err) => {
                warn!("listing failed: {}", err);
                let mut view = presenter::present(Vec::new());
                view.warning = Some(err.to_string());
                view
            }
        }
    }

    /// Upload files one at a time, reporting each independently.
    pub async fn upload_batch(&self, batch: Option<&str>, items: Vec<UploadItem>) -> BatchReport {
        if let Some(id) = batch {
            let entry = self.processed_batches.entry(id.to_string()).or_insert(());
            if !entry.is_fresh() {
                debug!("batch {} already processed, skipping", id);
                return BatchReport {
                    batch: Some(id.to_string()),
                    skipped: true,
                    results: Vec::new(),
                };
            }
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let content_type = content_type_or_default(item.content_type.as_deref());
            let outcome = match self
                .gateway
                .upload(&item.name, item.bytes, &content_type)
                .await
            {
                Ok(object) => {
                    info!("uploaded {} ({} bytes)", item.name, object.size_bytes);
                    UploadOutcome {
                        name: item.name,
                        ok: true,
                        storage_key: Some(object.storage_key),
                        error: None,
                    }
                }
                Err(err) => {
                    warn!("upload of {} failed: {}", item.name, err);
                    UploadOutcome {
                        name: item.name,
                        ok: false,
                        storage_key: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            results.push(outcome);
        }

        BatchReport {
            batch: batch.map(str::to_string),
            skipped: false,
            results,
        }
    }

    /// Payload plus the name and type to serve it under.
    pub async fn download(&self, storage_key: &str) -> GatewayResult<StoredFile> {
        self.gateway.download(storage_key).await
    }

    /// Delete `storage_key`; a key that is already gone is not an error.
    pub async fn delete(&self, storage_key: &str) -> GatewayResult<DeleteOutcome> {
        match self.gateway.delete(storage_key).await {
            Ok(()) => {
                info!("deleted {}", storage_key);
                Ok(DeleteOutcome::Deleted)
            }
            Err(GatewayError::ObjectNotFound(_)) => {
                debug!("{} was already gone", storage_key);
                Ok(DeleteOutcome::AlreadyGone)
            }
            Err(err) => Err(err),
        }
    }

    /// Preview by the kind of the file's display name. The name is only
    /// known once the backend answers, so the payload comes with it.
    pub async fn preview(&self, storage_key: &str) -> GatewayResult<Preview> {
        let StoredFile { object, bytes } = self.gateway.download(storage_key).await?;

        match presenter::preview_kind(&object.display_name) {
            PreviewKind::None => Ok(Preview::Unsupported),
            PreviewKind::Document => Ok(Preview::Document {
                display_name: object.display_name,
            }),
            PreviewKind::Image => Ok(Preview::Image {
                content_type: object.content_type,
                bytes,
            }),
            PreviewKind::Text(sub_kind) => {
                match String::from_utf8(bytes.to_vec()) {
                    Ok(content) => Ok(Preview::Text {
                        sub_kind,
                        language: presenter::highlight_language(&object.display_name),
                        content,
                    }),
                    Err(err) => Ok(Preview::Unreadable {
                        reason: err.to_string(),
                    }),
                }
            }
        }
    }
}
