//! Local filesystem backend.
//!
//! Files live directly under the storage directory with their display name as
//! the file name, so the storage key *is* the display name. Re-uploading a
//! name overwrites the previous file. Writes go to a hidden `.tmp-<uuid>`
//! sibling first and are renamed into place.

use crate::{
    models::stored_object::{StoredFile, StoredObject},
    services::gateway::{BackendKind, GatewayError, GatewayResult, StorageGateway},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    fs::Metadata,
    io::{self, ErrorKind},
    path::PathBuf,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

#[derive(Clone, Debug)]
pub struct LocalGateway {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl LocalGateway {
    /// Use `root` as the storage scope, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_upload_bytes: u64::MAX,
        })
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Reject names that would leave the storage directory or carry control
    /// characters. A leading dot is refused as well: dot-files hold in-flight
    /// temp files and are hidden from listings, and it also rules out `.`
    /// and `..`. Inner dots (`a..b.txt`) are ordinary name characters.
    fn ensure_name_safe(name: &str) -> Result<(), &'static str> {
        if name.is_empty() {
            return Err("file name is empty");
        }
        if name.len() > MAX_NAME_LEN {
            return Err("file name is too long");
        }
        if name.starts_with('.') {
            return Err("file name cannot start with a dot");
        }
        if name.contains('/') || name.contains('\\') {
            return Err("file name cannot contain path separators");
        }
        if name.chars().any(char::is_control) {
            return Err("file name cannot contain control characters");
        }
        Ok(())
    }

    fn object_path(&self, storage_key: &str) -> GatewayResult<PathBuf> {
        Self::ensure_name_safe(storage_key)
            .map_err(|_| GatewayError::ObjectNotFound(storage_key.to_string()))?;
        Ok(self.root.join(storage_key))
    }

    fn stored_object(name: String, meta: &Metadata) -> StoredObject {
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        StoredObject {
            storage_key: name.clone(),
            display_name: name,
            size_bytes: meta.len(),
            created_at: meta.created().ok().map(DateTime::<Utc>::from),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            content_type,
        }
    }
}

fn read_error(key: &str, err: io::Error) -> GatewayError {
    match err.kind() {
        ErrorKind::NotFound => GatewayError::ObjectNotFound(key.to_string()),
        _ => GatewayError::BackendUnavailable(err.to_string()),
    }
}

fn write_error(err: io::Error) -> GatewayError {
    match err.kind() {
        ErrorKind::NotFound => GatewayError::BackendUnavailable(err.to_string()),
        _ => GatewayError::UploadRejected(err.to_string()),
    }
}

#[async_trait]
impl StorageGateway for LocalGateway {
    async fn list(&self) -> GatewayResult<Vec<StoredObject>> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|err| GatewayError::BackendUnavailable(err.to_string()))?;

        let mut objects = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| GatewayError::BackendUnavailable(err.to_string()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                debug!("skipping non UTF-8 entry {:?}", entry.path());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // removed between read_dir and stat
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(GatewayError::BackendUnavailable(err.to_string())),
            };
            if !meta.is_file() {
                continue;
            }
            objects.push(Self::stored_object(name, &meta));
        }

        debug!("listed {} files in {}", objects.len(), self.root.display());
        Ok(objects)
    }

    async fn upload(
        &self,
        display_name: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> GatewayResult<StoredObject> {
        Self::ensure_name_safe(display_name)
            .map_err(|reason| GatewayError::UploadRejected(format!("{display_name}: {reason}")))?;
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(GatewayError::UploadRejected(format!(
                "{display_name} exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }

        let file_path = self.root.join(display_name);
        let tmp_path = self.root.join(format!(".tmp-{}", Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(write_error(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await.map_err(write_error)?;
                fs::rename(&tmp_path, &file_path)
                    .await
                    .map_err(write_error)?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(write_error(err));
            }
        }

        let meta = fs::metadata(&file_path).await.map_err(write_error)?;
        debug!("stored {} ({} bytes)", file_path.display(), meta.len());
        Ok(Self::stored_object(display_name.to_string(), &meta))
    }

    async fn download(&self, storage_key: &str) -> GatewayResult<StoredFile> {
        let path = self.object_path(storage_key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| read_error(storage_key, err))?;
        if !meta.is_file() {
            return Err(GatewayError::ObjectNotFound(storage_key.to_string()));
        }
        let data = fs::read(&path)
            .await
            .map_err(|err| read_error(storage_key, err))?;
        Ok(StoredFile {
            object: Self::stored_object(storage_key.to_string(), &meta),
            bytes: Bytes::from(data),
        })
    }

    async fn delete(&self, storage_key: &str) -> GatewayResult<()> {
        let path = self.object_path(storage_key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed {}", path.display());
                Ok(())
            }
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to remove {}: {}", path.display(), err);
                }
                Err(read_error(storage_key, err))
            }
        }
    }

    async fn check(&self) -> GatewayResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(GatewayError::BackendUnavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(err) => Err(GatewayError::BackendUnavailable(err.to_string())),
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}
