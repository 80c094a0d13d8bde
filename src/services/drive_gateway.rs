//! Google Drive backend.
//!
//! Talks to the Drive v3 REST API. Drive stores the filename as native file
//! metadata, so display names are sent as-is and the Drive file id is the
//! storage key. Everything lives in one configured parent folder.
//!
//! Two ways to authenticate: a ready OAuth access token, or a service
//! account whose signed JWT is exchanged for a short-lived access token.

use crate::{
    models::stored_object::{StoredFile, StoredObject, content_type_or_default},
    services::gateway::{BackendKind, GatewayError, GatewayResult, StorageGateway},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,size,createdTime,modifiedTime,mimeType";
const PAGE_SIZE: &str = "1000";

/// Refresh cached tokens this long before Google says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const JWT_LIFETIME_SECS: i64 = 3600;

/// The parts of a service account JSON key file this backend needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// How requests to Drive are authorised.
pub enum DriveAuth {
    /// Bearer token obtained elsewhere (e.g. an OAuth consent flow).
    OAuth { access_token: String },
    /// Service account credentials; access tokens are minted on demand and
    /// cached until shortly before they expire.
    ServiceAccount {
        key: ServiceAccountKey,
        encoding_key: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl DriveAuth {
    pub fn oauth(access_token: impl Into<String>) -> Self {
        DriveAuth::OAuth {
            access_token: access_token.into(),
        }
    }

    pub fn service_account(key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM key")?;
        Ok(DriveAuth::ServiceAccount {
            key,
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    /// Read a service account JSON key file (the `credentials.json` Google
    /// hands out).
    pub async fn service_account_from_file(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).context("parsing service account JSON")?;
        Self::service_account(key)
    }

    fn kind(&self) -> BackendKind {
        match self {
            DriveAuth::OAuth { .. } => BackendKind::DriveOauth,
            DriveAuth::ServiceAccount { .. } => BackendKind::DriveServiceAccount,
        }
    }

    async fn access_token(&self, client: &Client) -> GatewayResult<String> {
        match self {
            DriveAuth::OAuth { access_token } => Ok(access_token.clone()),
            DriveAuth::ServiceAccount {
                key,
                encoding_key,
                cached,
            } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.access_token.clone());
                    }
                }

                let fresh = exchange_jwt(client, key, encoding_key).await?;
                let token = fresh.access_token.clone();
                *cached = Some(fresh);
                Ok(token)
            }
        }
    }
}

/// Sign a JWT for the service account and trade it for an access token.
async fn exchange_jwt(
    client: &Client,
    key: &ServiceAccountKey,
    encoding_key: &EncodingKey,
) -> GatewayResult<CachedToken> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: DRIVE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + JWT_LIFETIME_SECS,
    };
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, encoding_key)
        .map_err(|err| GatewayError::BackendUnavailable(format!("signing JWT: {}", err)))?;

    debug!("requesting access token for {}", key.client_email);
    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(transport_error)?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!("token exchange failed: {} - {}", status, body);
        return Err(GatewayError::BackendUnavailable(format!(
            "token exchange failed: {}",
            status
        )));
    }

    let token: TokenResponse = response.json().await.map_err(transport_error)?;
    let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
    info!("obtained service account access token (valid {}s)", token.expires_in);
    Ok(CachedToken {
        access_token: token.access_token,
        refresh_at: Instant::now() + lifetime,
    })
}

/// A file resource as returned by the Drive API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    /// Drive reports sizes as decimal strings; absent for Google Docs types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    fn into_stored_object(self) -> StoredObject {
        StoredObject {
            size_bytes: self
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            content_type: content_type_or_default(self.mime_type.as_deref()),
            created_at: self.created_time,
            modified_at: self.modified_time,
            display_name: self.name,
            storage_key: self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Which call a failed response belongs to; decides how statuses map onto
/// [`GatewayError`].
#[derive(Clone, Copy)]
enum Call<'a> {
    List,
    Upload,
    Read(&'a str),
    Check,
}

/// Storage gateway over one Drive folder.
pub struct DriveGateway {
    client: Client,
    auth: DriveAuth,
    folder_id: String,
    api_base: String,
    upload_base: String,
    max_upload_bytes: u64,
}

impl DriveGateway {
    /// `timeout` bounds every HTTP round trip, token exchange included.
    pub fn new(auth: DriveAuth, folder_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            auth,
            folder_id: folder_id.into(),
            api_base: DRIVE_API.to_string(),
            upload_base: DRIVE_UPLOAD_API.to_string(),
            max_upload_bytes: u64::MAX,
        })
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Point the gateway at a different API host (used against mock servers).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(file_id))
    }

    async fn send(&self, request: RequestBuilder) -> GatewayResult<Response> {
        let token = self.auth.access_token(&self.client).await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)
    }

    async fn fetch_page(&self, page_token: Option<&str>) -> GatewayResult<DriveFileList> {
        let query = format!("'{}' in parents and trashed=false", self.folder_id);
        let fields = format!("nextPageToken, files({})", FILE_FIELDS);
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", PAGE_SIZE),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let request = self
            .client
            .get(format!("{}/files", self.api_base))
            .query(&params);
        let response = expect_success(self.send(request).await?, Call::List).await?;
        response.json().await.map_err(transport_error)
    }
}

/// Frame metadata and content as a `multipart/related` upload body.
fn multipart_related(boundary: &str, metadata: &serde_json::Value, content_type: &str, bytes: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(bytes.len() + 512);
    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata.to_string().as_bytes());
    body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.put_slice(bytes);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body.freeze()
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::BackendUnavailable(err.to_string())
}

/// Turn a non-2xx response into the matching [`GatewayError`].
async fn expect_success(response: Response, call: Call<'_>) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!("drive responded {}: {}", status, body);
    let detail = format!("{} - {}", status, body.trim());

    Err(match call {
        Call::Read(key) if status == StatusCode::NOT_FOUND => {
            GatewayError::ObjectNotFound(key.to_string())
        }
        Call::Upload if status.is_client_error() => GatewayError::UploadRejected(detail),
        Call::List | Call::Upload | Call::Read(_) | Call::Check => {
            GatewayError::BackendUnavailable(detail)
        }
    })
}

#[async_trait]
impl StorageGateway for DriveGateway {
    async fn list(&self) -> GatewayResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.fetch_page(page_token.as_deref()).await?;
            objects.extend(
                page.files
                    .into_iter()
                    .filter(|f| !f.is_folder())
                    .map(DriveFile::into_stored_object),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("listed {} files in folder {}", objects.len(), self.folder_id);
        Ok(objects)
    }

    async fn upload(
        &self,
        display_name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> GatewayResult<StoredObject> {
        if display_name.trim().is_empty() {
            return Err(GatewayError::UploadRejected("file name is empty".into()));
        }
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(GatewayError::UploadRejected(format!(
                "{display_name} exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }

        let content_type = content_type_or_default(Some(content_type));
        let metadata = serde_json::json!({
            "name": display_name,
            "parents": [self.folder_id],
            "mimeType": content_type,
        });
        let boundary = format!("file-store-{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &content_type, &bytes);

        let request = self
            .client
            .post(format!("{}/files", self.upload_base))
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", FILE_FIELDS),
            ])
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let response = expect_success(self.send(request).await?, Call::Upload).await?;
        let created: DriveFile = response.json().await.map_err(transport_error)?;
        info!("uploaded {} to Drive as {}", display_name, created.id);

        let mut object = created.into_stored_object();
        if object.size_bytes == 0 {
            object.size_bytes = bytes.len() as u64;
        }
        Ok(object)
    }

    /// Drive serves metadata and content from separate requests on the same
    /// file resource: the metadata request names and types the payload, the
    /// `alt=media` request fetches it.
    async fn download(&self, storage_key: &str) -> GatewayResult<StoredFile> {
        let request = self
            .client
            .get(self.file_url(storage_key))
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);
        let response = expect_success(self.send(request).await?, Call::Read(storage_key)).await?;
        let file: DriveFile = response.json().await.map_err(transport_error)?;

        let request = self
            .client
            .get(self.file_url(storage_key))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        let response = expect_success(self.send(request).await?, Call::Read(storage_key)).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;

        let mut object = file.into_stored_object();
        if object.size_bytes == 0 {
            object.size_bytes = bytes.len() as u64;
        }
        Ok(StoredFile { object, bytes })
    }

    async fn delete(&self, storage_key: &str) -> GatewayResult<()> {
        let request = self
            .client
            .delete(self.file_url(storage_key))
            .query(&[("supportsAllDrives", "true")]);
        expect_success(self.send(request).await?, Call::Read(storage_key)).await?;
        debug!("deleted Drive file {}", storage_key);
        Ok(())
    }

    /// Fetch the folder's own metadata; proves both auth and folder access.
    async fn check(&self) -> GatewayResult<()> {
        let request = self
            .client
            .get(self.file_url(&self.folder_id))
            .query(&[("fields", "id"), ("supportsAllDrives", "true")]);
        expect_success(self.send(request).await?, Call::Check).await?;
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        self.auth.kind()
    }
}
