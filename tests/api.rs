use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use file_store::services::{
    bucket_gateway::BucketGateway, file_service::FileService, gateway::StorageGateway,
    local_gateway::LocalGateway,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "XyZfileStoreBoundary";
const BODY_LIMIT: usize = 1024 * 1024;

async fn local_app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let gateway = LocalGateway::open(dir.path()).await.unwrap();
    let app = file_store::app(FileService::new(Arc::new(gateway)), BODY_LIMIT);
    (dir, app)
}

async fn bucket_app() -> (TempDir, Router) {
    let (dir, app, _) = bucket_app_with_gateway().await;
    (dir, app)
}

async fn bucket_app_with_gateway() -> (TempDir, Router, Arc<dyn StorageGateway>) {
    let dir = TempDir::new().unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let gateway = BucketGateway::new(Arc::new(pool), dir.path());
    gateway.migrate().await.unwrap();
    let gateway: Arc<dyn StorageGateway> = Arc::new(gateway);
    let app = file_store::app(FileService::new(gateway.clone()), BODY_LIMIT);
    (dir, app, gateway)
}

fn file<'a>(name: &'a str, content_type: &'a str, data: &'a [u8]) -> (&'a str, &'a str, &'a [u8]) {
    (name, content_type, data)
}

fn multipart(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(app: &Router, uri: &str, files: &[(&str, &str, &[u8])]) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(files)))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get(app: &Router, uri: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn delete(app: &Router, uri: &str) -> StatusCode {
    app.clone()
        .oneshot(Request::delete(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn healthz_is_ok() {
    let (_dir, app) = local_app().await;
    let (status, body) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn readyz_reports_backend() {
    let (_dir, app) = bucket_app().await;
    let (status, body) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "bucket");
    assert_eq!(body["checks"]["storage"]["ok"], true);
}

#[tokio::test]
async fn bucket_upload_list_download_delete() {
    let (_dir, app) = bucket_app().await;

    let (status, report) = upload(
        &app,
        "/files",
        &[file("notes.txt", "text/plain", b"hello world")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["results"][0]["ok"], true);
    let key = report["results"][0]["storage_key"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(key, "notes.txt");

    let (status, listing) = get_json(&app, "/files").await;
    assert_eq!(status, StatusCode::OK);
    let entries = listing["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["display_name"], "notes.txt");
    assert_eq!(entries[0]["size"], "11 B");
    assert_eq!(entries[0]["preview"]["kind"], "text");
    assert_eq!(listing["totals"]["count"], 1);
    assert_eq!(listing["totals"]["total_size"], "11 B");
    assert!(listing.get("warning").is_none());

    let (status, headers, body) = get(&app, &format!("/files/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello world");
    assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''notes.txt"
    );

    assert_eq!(delete(&app, &format!("/files/{key}")).await, StatusCode::NO_CONTENT);
    // already gone still counts as deleted
    assert_eq!(delete(&app, &format!("/files/{key}")).await, StatusCode::NO_CONTENT);

    let (status, _, _) = get(&app, &format!("/files/{key}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listing) = get_json(&app, "/files").await;
    assert_eq!(listing["totals"]["count"], 0);
}

#[tokio::test]
async fn bucket_keeps_duplicate_names_apart() {
    let (_dir, app) = bucket_app().await;
    upload(&app, "/files", &[file("same.csv", "text/csv", b"a,b")]).await;
    upload(&app, "/files", &[file("same.csv", "text/csv", b"a,b,c")]).await;

    let (_, listing) = get_json(&app, "/files").await;
    let entries = listing["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["display_name"] == "same.csv"));
    assert_ne!(entries[0]["storage_key"], entries[1]["storage_key"]);
    assert_eq!(listing["totals"]["total_bytes"], 8);
}

#[tokio::test]
async fn local_batch_reports_each_file() {
    let (dir, app) = local_app().await;
    let (status, report) = upload(
        &app,
        "/files",
        &[
            file("first.md", "text/markdown", b"# one"),
            file(".hidden", "text/plain", b"nope"),
            file("third.json", "application/json", b"{}"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["ok"], true);
    assert_eq!(results[1]["ok"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("upload rejected"));
    assert_eq!(results[2]["ok"], true);

    assert!(dir.path().join("first.md").exists());
    assert!(dir.path().join("third.json").exists());

    let (_, listing) = get_json(&app, "/files").await;
    assert_eq!(listing["totals"]["count"], 2);
}

#[tokio::test]
async fn local_same_name_overwrites() {
    let (_dir, app) = local_app().await;
    upload(&app, "/files", &[file("a.txt", "text/plain", b"old")]).await;
    upload(&app, "/files", &[file("a.txt", "text/plain", b"newer")]).await;

    let (_, listing) = get_json(&app, "/files").await;
    assert_eq!(listing["totals"]["count"], 1);
    let (_, _, body) = get(&app, "/files/a.txt").await;
    assert_eq!(body, b"newer");
}

#[tokio::test]
async fn resubmitted_batch_is_skipped() {
    let (_dir, app) = bucket_app().await;
    let files: &[(&str, &str, &[u8])] = &[file("once.txt", "text/plain", b"1")];

    let (_, first) = upload(&app, "/files?batch=abc", files).await;
    assert_eq!(first["skipped"], false);
    let (_, second) = upload(&app, "/files?batch=abc", files).await;
    assert_eq!(second["skipped"], true);
    assert!(second["results"].as_array().unwrap().is_empty());

    let (_, listing) = get_json(&app, "/files").await;
    assert_eq!(listing["totals"]["count"], 1);
}

#[tokio::test]
async fn empty_upload_is_bad_request() {
    let (_dir, app) = local_app().await;
    let (status, body) = upload(&app, "/files", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn previews_by_type() {
    let (_dir, app) = local_app().await;
    upload(
        &app,
        "/files",
        &[
            file("data.csv", "text/csv", b"x,y\n1,2\n"),
            file("app.js", "text/javascript", b"let a = 1;"),
            file("paper.pdf", "application/pdf", b"%PDF-1.4"),
            file("pic.png", "image/png", b"\x89PNG\r\n"),
            file("bundle.zip", "application/zip", b"PK"),
            file("latin1.txt", "text/plain", b"caf\xe9"),
        ],
    )
    .await;

    let (status, body) = get_json(&app, "/files/data.csv/preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sub_kind"], "tabular");
    assert_eq!(body["content"], "x,y\n1,2\n");
    assert!(body["language"].is_null());

    let (_, body) = get_json(&app, "/files/app.js/preview").await;
    assert_eq!(body["language"], "js");

    let (status, body) = get_json(&app, "/files/paper.pdf/preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "document");

    let (status, headers, bytes) = get(&app, "/files/pic.png/preview").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(bytes, b"\x89PNG\r\n");

    let (status, _) = get_json(&app, "/files/bundle.zip/preview").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let (status, _) = get_json(&app, "/files/latin1.txt/preview").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get_json(&app, "/files/missing.txt/preview").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unavailable_backend_degrades_listing() {
    let (dir, app) = local_app().await;
    let root = dir.path().to_path_buf();
    drop(dir);
    assert!(!root.exists());

    let (status, listing) = get_json(&app, "/files").await;
    assert_eq!(status, StatusCode::OK);
    assert!(listing["entries"].as_array().unwrap().is_empty());
    assert_eq!(listing["totals"]["count"], 0);
    assert!(listing["warning"].as_str().unwrap().contains("unavailable"));

    let (status, body) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["storage"]["ok"], false);
}

#[tokio::test]
async fn non_ascii_names_survive_download() {
    let (_dir, app, gateway) = bucket_app_with_gateway().await;
    let key = gateway
        .upload("회의록.txt", Bytes::from_static(b"ok"), "text/plain")
        .await
        .unwrap()
        .storage_key;

    let (status, headers, _) = get(&app, &format!("/files/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''%ED%9A%8C%EC%9D%98%EB%A1%9D.txt"
    );
}

#[tokio::test]
async fn bucket_serves_long_non_ascii_names() {
    let (_dir, app, gateway) = bucket_app_with_gateway().await;
    let name = format!("{}.pdf", "회의록".repeat(20));
    let key = gateway
        .upload(&name, Bytes::from_static(b"%PDF-1.7"), "application/pdf")
        .await
        .unwrap()
        .storage_key;

    let (status, listing) = get_json(&app, "/files").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["entries"][0]["display_name"], name.as_str());

    let (status, headers, body) = get(&app, &format!("/files/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(body, b"%PDF-1.7");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.ends_with(".pdf"));
    assert!(disposition.contains("%ED%9A%8C%EC%9D%98%EB%A1%9D"));
}
