//! Bucket namespace: named, versioned stores of key -> response snapshot
//!
//! `MemoryStorage` keeps everything in process and backs the tests.
//! `DiskStorage` persists buckets as directories so they survive restarts.

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use crate::request::{CacheKey, MatchOptions};
use crate::types::{BucketId, ResponseSnapshot, StorageStats};
use async_trait::async_trait;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist yet. Idempotent.
    async fn open(&self, bucket: &BucketId) -> Result<()>;

    async fn has(&self, bucket: &BucketId) -> bool;

    /// Bucket ids in creation order
    async fn keys(&self) -> Vec<BucketId>;

    /// Returns whether a bucket was removed
    async fn delete(&self, bucket: &BucketId) -> Result<bool>;

    /// Insert or overwrite an entry, creating the bucket if needed
    async fn put(&self, bucket: &BucketId, key: &CacheKey, response: ResponseSnapshot)
        -> Result<()>;

    async fn match_in(&self, bucket: &BucketId, key: &CacheKey) -> Option<ResponseSnapshot>;

    /// Entry keys in insertion order; empty for a missing bucket
    async fn entries(&self, bucket: &BucketId) -> Vec<CacheKey>;

    async fn stats(&self) -> StorageStats;

    async fn match_with(
        &self,
        bucket: &BucketId,
        key: &CacheKey,
        options: MatchOptions,
    ) -> Option<ResponseSnapshot> {
        if !options.ignore_search {
            return self.match_in(bucket, key).await;
        }

        if let Some(found) = self.match_in(bucket, key).await {
            return Some(found);
        }

        let wanted = key.without_search();
        let candidate = self
            .entries(bucket)
            .await
            .into_iter()
            .find(|stored| stored.without_search() == wanted)?;
        self.match_in(bucket, &candidate).await
    }
}
