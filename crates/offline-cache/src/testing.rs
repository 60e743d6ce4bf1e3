//! Fakes shared by the unit tests

use crate::error::{CacheError, Result};
use crate::network::{FetchMode, Network};
use crate::request::{CacheKey, Request};
use crate::storage::{CacheStorage, MemoryStorage};
use crate::types::{BucketId, ResponseKind, ResponseSnapshot, StorageStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;
use url::Url;

pub const SCOPE: &str = "https://app.example/";

pub fn scope() -> Url {
    Url::parse(SCOPE).unwrap()
}

pub fn url(path: &str) -> Url {
    scope().join(path).unwrap()
}

pub fn key(path: &str) -> CacheKey {
    CacheKey::from_url(&url(path))
}

/// Network with canned responses per URL; unknown URLs fail like a dead host
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (u16, Vec<u8>, ResponseKind)>>,
    calls: Mutex<Vec<(String, FetchMode)>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, path: &str, status: u16, body: &str) -> Self {
        self.set(path, status, body, ResponseKind::Basic);
        self
    }

    /// Cross-origin success without CORS headers, as `HttpNetwork` reports it
    pub fn serve_opaque(self, path: &str, body: &str) -> Self {
        self.set(path, 200, body, ResponseKind::Opaque);
        self
    }

    pub fn set(&self, path: &str, status: u16, body: &str, kind: ResponseKind) {
        self.routes.lock().unwrap().insert(
            url(path).to_string(),
            (status, body.as_bytes().to_vec(), kind),
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, FetchMode)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == target)
            .count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<ResponseSnapshot> {
        let target = request.url.to_string();
        self.calls.lock().unwrap().push((target.clone(), mode));

        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Network("offline".to_string()));
        }

        let route = self.routes.lock().unwrap().get(&target).cloned();
        match route {
            Some((status, body, kind)) => Ok(ResponseSnapshot::new(target, status, body)
                .with_header("content-type", "text/plain")
                .with_kind(kind)),
            None => Err(CacheError::Network(format!("unreachable: {}", target))),
        }
    }
}

/// Memory storage whose puts block until the test releases them
pub struct GatedStorage {
    inner: MemoryStorage,
    gate: Semaphore,
    puts_started: AtomicUsize,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            gate: Semaphore::new(0),
            puts_started: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, puts: usize) {
        self.gate.add_permits(puts);
    }

    pub fn puts_started(&self) -> usize {
        self.puts_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorage for GatedStorage {
    async fn open(&self, bucket: &BucketId) -> Result<()> {
        self.inner.open(bucket).await
    }

    async fn has(&self, bucket: &BucketId) -> bool {
        self.inner.has(bucket).await
    }

    async fn keys(&self) -> Vec<BucketId> {
        self.inner.keys().await
    }

    async fn delete(&self, bucket: &BucketId) -> Result<bool> {
        self.inner.delete(bucket).await
    }

    async fn put(
        &self,
        bucket: &BucketId,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<()> {
        self.puts_started.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(|e| CacheError::Storage(e.to_string()))?
            .forget();
        self.inner.put(bucket, key, response).await
    }

    async fn match_in(&self, bucket: &BucketId, key: &CacheKey) -> Option<ResponseSnapshot> {
        self.inner.match_in(bucket, key).await
    }

    async fn entries(&self, bucket: &BucketId) -> Vec<CacheKey> {
        self.inner.entries(bucket).await
    }

    async fn stats(&self) -> StorageStats {
        self.inner.stats().await
    }
}

/// Memory storage that refuses to delete some buckets
pub struct StickyStorage {
    pub inner: MemoryStorage,
    pub undeletable: Vec<BucketId>,
}

#[async_trait]
impl CacheStorage for StickyStorage {
    async fn open(&self, bucket: &BucketId) -> Result<()> {
        self.inner.open(bucket).await
    }

    async fn has(&self, bucket: &BucketId) -> bool {
        self.inner.has(bucket).await
    }

    async fn keys(&self) -> Vec<BucketId> {
        self.inner.keys().await
    }

    async fn delete(&self, bucket: &BucketId) -> Result<bool> {
        if self.undeletable.contains(bucket) {
            return Err(CacheError::Storage(format!("{} is busy", bucket)));
        }
        self.inner.delete(bucket).await
    }

    async fn put(
        &self,
        bucket: &BucketId,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<()> {
        self.inner.put(bucket, key, response).await
    }

    async fn match_in(&self, bucket: &BucketId, key: &CacheKey) -> Option<ResponseSnapshot> {
        self.inner.match_in(bucket, key).await
    }

    async fn entries(&self, bucket: &BucketId) -> Vec<CacheKey> {
        self.inner.entries(bucket).await
    }

    async fn stats(&self) -> StorageStats {
        self.inner.stats().await
    }
}
