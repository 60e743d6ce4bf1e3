//! Configuration and response types for the offline proxy

use offline_cache::{BucketId, StorageStats, WorkerState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where cached buckets are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Disk,
    Memory,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Some(Self::Disk),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Configuration for the offline proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    /// Origin and base path the cached app is served from
    pub scope_url: String,
    pub cache_dir: PathBuf,
    pub storage: StorageBackend,
    pub manifest_path: Option<PathBuf>,
    pub cache_version: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            scope_url: "http://localhost:8080/".to_string(),
            cache_dir: PathBuf::from("./cache/offline"),
            storage: StorageBackend::Disk,
            manifest_path: None,
            cache_version: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub worker: WorkerState,
    pub current_bucket: Option<BucketId>,
    pub storage: StorageStats,
}

#[derive(Debug, Serialize)]
pub struct CachesResponse {
    pub caches: Vec<BucketId>,
    pub current: Option<BucketId>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub force_activated: bool,
}

/// Registers an open page with the worker
#[derive(Debug, Deserialize)]
pub struct OpenClientRequest {
    pub url: String,
    #[serde(default)]
    pub controlled: bool,
}

#[derive(Debug, Serialize)]
pub struct OpenClientResponse {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct WakeLockResponse {
    pub active: bool,
    pub id: Option<u32>,
}
