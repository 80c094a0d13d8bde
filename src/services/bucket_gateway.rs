//! src/services/bucket_gateway.rs
//!
//! BucketGateway: flat-key object storage. Metadata lives in SQLite and
//! payloads on disk sharded beneath `base_path/{shard}/{shard}/{id}`, where
//! `id` is the row's UUID.
//!
//! The bucket has a single string key per object and no field for the
//! original filename, so keys are produced by `name_codec::encode` and the
//! display name is recovered with `name_codec::decode` on listing. Keys grow
//! with the name and are only ever stored in the `objects` table, never used
//! as file names.

use crate::{
    models::{
        object_record::ObjectRecord,
        stored_object::{StoredFile, StoredObject, content_type_or_default},
    },
    services::{
        gateway::{BackendKind, GatewayError, GatewayResult, StorageGateway},
        name_codec,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const SELECT_OBJECT: &str = "SELECT id, key, content_type, size_bytes, etag, created_at, is_deleted FROM objects";

#[derive(Clone)]
pub struct BucketGateway {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    max_upload_bytes: u64,
}

impl BucketGateway {
    /// Wrap an existing pool. The schema is not touched; call [`migrate`].
    ///
    /// [`migrate`]: BucketGateway::migrate
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            max_upload_bytes: u64::MAX,
        }
    }

    /// Open the metadata database at `database_url` (creating it if missing),
    /// ensure the schema exists and the payload directory is present.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        acquire_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        let gateway = Self::new(Arc::new(pool), base_path);
        gateway.migrate().await?;
        Ok(gateway)
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Create the `objects` table and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} schema statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for a payload file name.
    ///
    /// Uses MD5(name) and returns the first two bytes as lowercase hex.
    fn object_shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Payload location for the row `id`. Fixed length whatever the key.
    fn object_path(&self, id: Uuid) -> PathBuf {
        let name = id.simple().to_string();
        let (shard_a, shard_b) = Self::object_shards(&name);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    /// Fetch a live object row, `ObjectNotFound` if missing or soft-deleted.
    async fn fetch_object(&self, key: &str) -> GatewayResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_OBJECT} WHERE key = ? AND is_deleted = 0"
        ))
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => GatewayError::ObjectNotFound(key.to_string()),
            other => db_unavailable(other),
        })
    }

    /// Write `bytes` to `file_path` through a temp file in the same directory.
    async fn write_payload(file_path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = file_path.parent().ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(())
    }

    /// Remove empty shard directories from `start` up to (not including) the
    /// base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn db_unavailable(err: sqlx::Error) -> GatewayError {
    GatewayError::BackendUnavailable(err.to_string())
}

fn stored_object(record: ObjectRecord) -> StoredObject {
    StoredObject {
        display_name: name_codec::decode(&record.key),
        storage_key: record.key,
        size_bytes: record.size_bytes.max(0) as u64,
        created_at: Some(record.created_at),
        modified_at: None,
        content_type: content_type_or_default(record.content_type.as_deref()),
    }
}

#[async_trait]
impl StorageGateway for BucketGateway {
    async fn list(&self) -> GatewayResult<Vec<StoredObject>> {
        // keys ending in `/` are folder markers
        let rows = sqlx::query_as::<_, ObjectRecord>(&format!(
            "{SELECT_OBJECT} WHERE is_deleted = 0 AND key NOT LIKE '%/'"
        ))
        .fetch_all(&*self.db)
        .await
        .map_err(db_unavailable)?;

        debug!("listed {} objects", rows.len());
        Ok(rows.into_iter().map(stored_object).collect())
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

        let key = name_codec::encode(display_name);
        let id = Uuid::new_v4();

        let file_path = self.object_path(id);
        Self::write_payload(&file_path, &bytes)
            .await
            .map_err(|err| GatewayError::UploadRejected(err.to_string()))?;

        let etag = format!("{:x}", md5::compute(&bytes));
        let insert_result = sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO objects (id, key, content_type, size_bytes, etag, created_at, is_deleted)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            RETURNING id, key, content_type, size_bytes, etag, created_at, is_deleted
            "#,
        )
        .bind(id)
        .bind(&key)
        .bind(content_type_or_default(Some(content_type)))
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(record) => {
                debug!("stored {} as {}", display_name, key);
                Ok(stored_object(record))
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                warn!("metadata insert for {} failed: {}", key, err);
                Err(db_unavailable(err))
            }
        }
    }

    async fn download(&self, storage_key: &str) -> GatewayResult<StoredFile> {
        let record = self.fetch_object(storage_key).await?;

        let file_path = self.object_path(record.id);
        match fs::read(&file_path).await {
            Ok(data) => Ok(StoredFile {
                object: stored_object(record),
                bytes: Bytes::from(data),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("payload missing for live object {}", storage_key);
                Err(GatewayError::ObjectNotFound(storage_key.to_string()))
            }
            Err(err) => Err(GatewayError::BackendUnavailable(err.to_string())),
        }
    }

    /// Soft-delete the row, then remove the payload and prune empty shards.
    async fn delete(&self, storage_key: &str) -> GatewayResult<()> {
        let object = self.fetch_object(storage_key).await?;

        let result = sqlx::query("UPDATE objects SET is_deleted = 1 WHERE id = ? AND is_deleted = 0")
            .bind(object.id)
            .execute(&*self.db)
            .await
            .map_err(db_unavailable)?;

        // lost a race with another delete
        if result.rows_affected() == 0 {
            return Err(GatewayError::ObjectNotFound(storage_key.to_string()));
        }

        let file_path = self.object_path(object.id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => warn!("could not remove {}: {}", file_path.display(), err),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(())
    }

    async fn check(&self) -> GatewayResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => Ok(()),
            Ok(v) => Err(GatewayError::BackendUnavailable(format!(
                "unexpected result: {}",
                v
            ))),
            Err(err) => Err(db_unavailable(err)),
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Bucket
    }
}
