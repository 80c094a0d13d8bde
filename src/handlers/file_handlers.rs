//! HTTP handlers for the file listing and per-file actions.
//! Each handler performs exactly one user action against `FileService`.

use crate::{
    errors::AppError,
    models::{stored_object::StoredFile, view::ListingView},
    services::file_service::{BatchReport, FileService, Preview, UploadItem},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Query params accepted by `POST /files`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Client-chosen id for this form submission; a repeated id is ignored.
    pub batch: Option<String>,
}

/// `GET /files`: listing view with totals. Backend outages still return
/// 200 with an empty listing and a `warning`.
pub async fn list_files(State(service): State<FileService>) -> Json<ListingView> {
    Json(service.listing().await)
}

/// `POST /files`: multipart upload of one or more files.
///
/// Every part with a filename is uploaded in order; each gets its own
/// result entry, so one rejected file does not fail the request.
pub async fn upload_files(
    State(service): State<FileService>,
    Query(q): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<BatchReport>, AppError> {
    let mut items = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {}", err)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            debug!("skipping non-file form field {:?}", field.name());
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("reading {}: {}", name, err)))?;
        items.push(UploadItem {
            name,
            bytes,
            content_type,
        });
    }

    if items.is_empty() {
        return Err(AppError::bad_request("no files in upload"));
    }

    Ok(Json(service.upload_batch(q.batch.as_deref(), items).await))
}

/// `GET /files/{key}`: download as an attachment named after the
/// display name.
pub async fn download_file(
    State(service): State<FileService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let StoredFile { object, bytes } = service.download(&key).await?;

    let mut response = Response::new(Body::from(bytes));
    set_content_type(response.headers_mut(), &object.content_type);
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&object.display_name)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `GET /files/{key}/preview`: inline image bytes, text content as JSON,
/// or a hint for documents.
pub async fn preview_file(
    State(service): State<FileService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let response = match service.preview(&key).await? {
        Preview::Image {
            content_type,
            bytes,
        } => {
            let mut response = Response::new(Body::from(bytes));
            set_content_type(response.headers_mut(), &content_type);
            response.headers_mut().insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("inline"),
            );
            response
        }
        Preview::Text {
            sub_kind,
            language,
            content,
        } => Json(json!({
            "kind": "text",
            "sub_kind": sub_kind,
            "language": language,
            "content": content,
        }))
        .into_response(),
        Preview::Document { display_name } => Json(json!({
            "kind": "document",
            "display_name": display_name,
            "message": "PDF files can be viewed after downloading.",
        }))
        .into_response(),
        Preview::Unreadable { reason } => {
            return Err(AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("preview failed: {}", reason),
            ));
        }
        Preview::Unsupported => {
            return Err(AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "no preview available for this file type",
            ));
        }
    };
    Ok(response)
}

/// `DELETE /files/{key}`: 204 whether the file was removed now or was
/// already gone.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_content_type(headers: &mut HeaderMap, content_type: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
}
