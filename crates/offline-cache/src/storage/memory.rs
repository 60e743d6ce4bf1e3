//! In-process bucket storage

use super::CacheStorage;
use crate::error::Result;
use crate::request::CacheKey;
use crate::types::{BucketId, ResponseSnapshot, StorageStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Bucket {
    order: Vec<CacheKey>,
    entries: HashMap<CacheKey, ResponseSnapshot>,
}

impl Bucket {
    fn insert(&mut self, key: &CacheKey, response: ResponseSnapshot) {
        if self.entries.insert(key.clone(), response).is_none() {
            self.order.push(key.clone());
        }
    }

    fn size(&self) -> u64 {
        self.entries.values().map(ResponseSnapshot::size).sum()
    }
}

/// Bucket namespace held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<(BucketId, Bucket)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, bucket: &BucketId) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        if !buckets.iter().any(|(id, _)| id == bucket) {
            debug!(bucket = %bucket, "Created bucket");
            buckets.push((bucket.clone(), Bucket::default()));
        }
        Ok(())
    }

    async fn has(&self, bucket: &BucketId) -> bool {
        self.buckets.read().await.iter().any(|(id, _)| id == bucket)
    }

    async fn keys(&self) -> Vec<BucketId> {
        self.buckets
            .read()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn delete(&self, bucket: &BucketId) -> Result<bool> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|(id, _)| id != bucket);
        Ok(buckets.len() != before)
    }

    async fn put(
        &self,
        bucket: &BucketId,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        match buckets.iter_mut().find(|(id, _)| id == bucket) {
            Some((_, existing)) => existing.insert(key, response),
            None => {
                let mut created = Bucket::default();
                created.insert(key, response);
                buckets.push((bucket.clone(), created));
            }
        }
        Ok(())
    }

    async fn match_in(&self, bucket: &BucketId, key: &CacheKey) -> Option<ResponseSnapshot> {
        let found = self
            .buckets
            .read()
            .await
            .iter()
            .find(|(id, _)| id == bucket)
            .and_then(|(_, b)| b.entries.get(key).cloned());

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    async fn entries(&self, bucket: &BucketId) -> Vec<CacheKey> {
        self.buckets
            .read()
            .await
            .iter()
            .find(|(id, _)| id == bucket)
            .map(|(_, b)| b.order.clone())
            .unwrap_or_default()
    }

    async fn stats(&self) -> StorageStats {
        let buckets = self.buckets.read().await;
        StorageStats {
            buckets: buckets.len(),
            entries: buckets.iter().map(|(_, b)| b.entries.len()).sum(),
            total_size: buckets.iter().map(|(_, b)| b.size()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
