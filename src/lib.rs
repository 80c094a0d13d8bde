//! Browser-facing file storage manager: list, upload, download, preview and
//! delete files against one configured storage backend.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use services::file_service::FileService;

/// Router with state attached, ready to serve.
pub fn app(service: FileService, max_body_bytes: usize) -> Router {
    routes::routes::routes(max_body_bytes).with_state(service)
}
