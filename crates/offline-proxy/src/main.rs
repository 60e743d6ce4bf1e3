//! Boxing Timer offline proxy
//!
//! Serves the timer app through a versioned local cache so it keeps working
//! without a network, and exposes the wake-lock bridge the page uses while a
//! round is running.

mod bridge;
mod error;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::{ProxyConfig, StorageBackend};
use offline_cache::{
    CacheManifest, CacheStorage, DiskStorage, HttpNetwork, MemoryStorage, Network, OfflineWorker,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("offline_proxy=info".parse()?)
        .add_directive("offline_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Boxing Timer offline proxy...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Scope: {}", config.scope_url);
    info!("Storage: {:?} ({:?})", config.storage, config.cache_dir);

    let scope = Url::parse(&config.scope_url)?;

    let storage: Arc<dyn CacheStorage> = match config.storage {
        StorageBackend::Disk => {
            let disk = DiskStorage::new(config.cache_dir.clone());
            disk.init().await?;
            Arc::new(disk)
        }
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&scope));

    let manifest = load_manifest(&config).await?;
    info!(
        bucket = %manifest.bucket_id(),
        assets = manifest.assets.len(),
        "Loaded cache manifest"
    );

    let worker = OfflineWorker::new(storage.clone(), network.clone(), manifest, scope.clone())?;

    // Install failures other than an unopenable bucket are reported per asset
    let (installed, activated) = worker.install_and_activate().await?;
    info!(
        bucket = %installed.bucket,
        stored = installed.stored.len(),
        failed = installed.failed.len(),
        "Install finished"
    );
    match activated {
        Some(report) => info!(
            current = %report.current,
            deleted = report.deleted.len(),
            "Activated"
        ),
        None => warn!("Activation is waiting for controlled pages to close"),
    }

    let state: SharedState = Arc::new(ServerState::new(worker, storage, network, scope));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let scope_url = std::env::var("SCOPE_URL").unwrap_or(defaults.scope_url);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let storage = match std::env::var("STORAGE") {
        Ok(value) => StorageBackend::parse(&value)
            .ok_or_else(|| ProxyError::Config(format!("unknown STORAGE backend: {}", value)))?,
        Err(_) => defaults.storage,
    };

    let manifest_path = std::env::var("MANIFEST_PATH").ok().map(PathBuf::from);
    let cache_version = std::env::var("CACHE_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty());

    Ok(ProxyConfig {
        port,
        scope_url,
        cache_dir,
        storage,
        manifest_path,
        cache_version,
    })
}

async fn load_manifest(config: &ProxyConfig) -> Result<CacheManifest> {
    let manifest = match &config.manifest_path {
        Some(path) => CacheManifest::load(path).await?,
        None => CacheManifest::boxing_timer(),
    };
    Ok(match &config.cache_version {
        Some(version) => manifest.with_version(version),
        None => manifest,
    })
}
