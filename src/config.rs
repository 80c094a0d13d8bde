use crate::services::gateway::BackendKind;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub drive_folder_id: Option<String>,
    pub drive_access_token: Option<String>,
    pub service_account_path: String,
    pub request_timeout_secs: u64,
    pub max_upload_bytes: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File storage manager API")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend: local, bucket, drive-service-account, drive-oauth
    /// (overrides FILE_STORE_BACKEND)
    #[arg(long)]
    pub backend: Option<String>,

    /// Directory for local files or bucket payloads (overrides FILE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Bucket metadata database URL (overrides FILE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Drive folder holding the files (overrides FILE_STORE_DRIVE_FOLDER_ID)
    #[arg(long)]
    pub drive_folder_id: Option<String>,

    /// OAuth access token for drive-oauth (overrides FILE_STORE_DRIVE_ACCESS_TOKEN)
    #[arg(long)]
    pub drive_access_token: Option<String>,

    /// Service account key file (overrides FILE_STORE_SERVICE_ACCOUNT)
    #[arg(long = "service-account")]
    pub service_account_path: Option<String>,

    /// Per-call backend timeout in seconds (overrides FILE_STORE_REQUEST_TIMEOUT)
    #[arg(long = "request-timeout")]
    pub request_timeout_secs: Option<u64>,

    /// Largest accepted file in bytes (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Create the bucket metadata schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over values read through `lookup`; CLI wins.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let parsed = |name: &str| -> Result<Option<u64>> {
            text(name)?
                .map(|value| {
                    value
                        .parse::<u64>()
                        .with_context(|| format!("parsing {} value `{}`", name, value))
                })
                .transpose()
        };

        // --- Environment fallback ---
        let env_host = text("FILE_STORE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match text("FILE_STORE_PORT")? {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FILE_STORE_PORT value `{}`", value))?,
            None => 3000,
        };
        let backend_name = match args.backend {
            Some(name) => name,
            None => text("FILE_STORE_BACKEND")?.unwrap_or_else(|| "local".into()),
        };
        let env_storage =
            text("FILE_STORE_STORAGE_DIR")?.unwrap_or_else(|| "./data/files".into());
        let env_db = text("FILE_STORE_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/file_store.db".into());
        let env_service_account =
            text("FILE_STORE_SERVICE_ACCOUNT")?.unwrap_or_else(|| "credentials.json".into());
        let env_timeout = parsed("FILE_STORE_REQUEST_TIMEOUT")?.unwrap_or(30);
        let env_max_upload =
            parsed("FILE_STORE_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: BackendKind::from_str(&backend_name)?,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            drive_folder_id: args
                .drive_folder_id
                .or(text("FILE_STORE_DRIVE_FOLDER_ID")?),
            drive_access_token: args
                .drive_access_token
                .or(text("FILE_STORE_DRIVE_ACCESS_TOKEN")?),
            service_account_path: args.service_account_path.unwrap_or(env_service_account),
            request_timeout_secs: args.request_timeout_secs.unwrap_or(env_timeout).max(1),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults() {
        let cfg = AppConfig::resolve(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.backend, BackendKind::Local);
        assert_eq!(cfg.storage_dir, "./data/files");
        assert_eq!(cfg.service_account_path, "credentials.json");
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(cfg.drive_folder_id.is_none());
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(8080),
            backend: Some("bucket".into()),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(
            args,
            lookup(&[
                ("FILE_STORE_PORT", "9000"),
                ("FILE_STORE_BACKEND", "drive-oauth"),
                ("FILE_STORE_HOST", "127.0.0.1"),
                ("FILE_STORE_DRIVE_FOLDER_ID", "abc"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.backend, BackendKind::Bucket);
        assert_eq!(cfg.drive_folder_id.as_deref(), Some("abc"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = AppConfig::resolve(Args::default(), lookup(&[("FILE_STORE_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("FILE_STORE_PORT"));

        let err = AppConfig::resolve(
            Args::default(),
            lookup(&[("FILE_STORE_MAX_UPLOAD_BYTES", "-1")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("FILE_STORE_MAX_UPLOAD_BYTES"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err =
            AppConfig::resolve(Args::default(), lookup(&[("FILE_STORE_BACKEND", "ftp")])).unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }
}
