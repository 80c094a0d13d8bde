use anyhow::{Context, Result};
use file_store::{
    config::AppConfig,
    services::{
        bucket_gateway::BucketGateway, file_service::FileService, gateway,
        gateway::BackendKind,
    },
};
use std::{io::ErrorKind, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting file-store on {} with {} backend",
        cfg.addr(),
        cfg.backend
    );

    // --- Handle migration mode ---
    if migrate {
        if cfg.backend != BackendKind::Bucket {
            tracing::warn!("--migrate only applies to the bucket backend; nothing to do");
            return Ok(());
        }
        BucketGateway::connect(
            &cfg.database_url,
            &cfg.storage_dir,
            Duration::from_secs(cfg.request_timeout_secs),
        )
        .await
        .context("running bucket migrations")?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize storage backend ---
    let gateway = gateway::connect(&cfg).await?;
    let service = FileService::new(gateway);

    // --- Build router ---
    let body_limit = usize::try_from(cfg.max_upload_bytes).unwrap_or(usize::MAX);
    let app = file_store::app(service, body_limit);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
