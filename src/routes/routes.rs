//! Defines routes for the file store API.
//!
//! ## Structure
//! - **Listing endpoints**
//!   - `GET    /files`: listing view with totals
//!   - `POST   /files`: multipart batch upload (`?batch=<id>` dedupes resubmits)
//!
//! - **File-level endpoints**
//!   - `GET    /files/{key}`: download
//!   - `GET    /files/{key}/preview`: preview by file type
//!   - `DELETE /files/{key}`: delete

use crate::{
    handlers::{
        file_handlers::{delete_file, download_file, list_files, preview_file, upload_files},
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};

/// Build the router for all file routes.
///
/// `max_body_bytes` caps a whole upload request, so every file of one batch
/// has to fit in it together.
pub fn routes(max_body_bytes: usize) -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File-level routes
        .route("/files/{key}", get(download_file).delete(delete_file))
        .route("/files/{key}/preview", get(preview_file))
        // Listing routes
        .route("/files", get(list_files).post(upload_files))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
