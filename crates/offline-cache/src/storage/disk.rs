//! File-based bucket storage with an in-memory index
//!
//! Layout under the cache root:
//!
//! ```text
//! <bucket-id>/bucket.json              bucket metadata (creation time)
//! <bucket-id>/<sha256>.<token>.body    response body, one file per write
//! <bucket-id>/<sha256>.json            response metadata, renamed into place last
//! ```
//!
//! A body file is never rewritten. An overwrite writes a new body, swaps the
//! metadata and index entry together, then removes the old body, so readers
//! always see a complete snapshot.

use super::CacheStorage;
use crate::error::{CacheError, Result};
use crate::request::CacheKey;
use crate::types::{BucketId, ResponseKind, ResponseSnapshot, StorageStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const BUCKET_META: &str = "bucket.json";

/// Reads retried when a concurrent overwrite removes the body being read
const READ_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct BucketMeta {
    id: BucketId,
    created_at: DateTime<Utc>,
}

/// Everything about a stored response except its body
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: CacheKey,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    kind: ResponseKind,
    size: u64,
    stored_at: DateTime<Utc>,
    body_file: String,
}

#[derive(Debug)]
struct DiskBucket {
    id: BucketId,
    created_at: DateTime<Utc>,
    dir: PathBuf,
    entries: Vec<EntryMeta>,
}

/// Bucket namespace persisted under a cache directory
pub struct DiskStorage {
    root: PathBuf,
    buckets: RwLock<Vec<DiskBucket>>,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            buckets: RwLock::new(Vec::new()),
            writes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Ensure the cache root exists and rebuild the index from disk
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;

        let mut loaded = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match load_bucket(&entry.path()).await {
                Ok(bucket) => loaded.push(bucket),
                Err(e) => {
                    warn!(dir = ?entry.path(), error = %e, "Skipping unreadable bucket directory")
                }
            }
        }
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let count = loaded.len();
        *self.buckets.write().await = loaded;
        info!(cache_dir = ?self.root, buckets = count, "Disk storage initialized");
        Ok(())
    }

    /// File stem for an entry: hex SHA-256 of the key
    pub fn entry_name(key: &CacheKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Unique per write, including across restarts
    fn write_token(&self) -> String {
        format!(
            "{:x}-{:x}",
            Utc::now().timestamp_micros(),
            self.writes.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn bucket_dir(&self, bucket: &BucketId) -> Result<PathBuf> {
        let name = bucket.as_str();
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::Storage(format!(
                "bucket id {:?} is not a valid directory name",
                name
            )));
        }
        Ok(self.root.join(name))
    }

    async fn dir_of(&self, bucket: &BucketId) -> Option<PathBuf> {
        self.buckets
            .read()
            .await
            .iter()
            .find(|b| &b.id == bucket)
            .map(|b| b.dir.clone())
    }

    async fn lookup(&self, bucket: &BucketId, key: &CacheKey) -> Option<(PathBuf, EntryMeta)> {
        let buckets = self.buckets.read().await;
        buckets.iter().find(|b| &b.id == bucket).and_then(|b| {
            b.entries
                .iter()
                .find(|e| &e.key == key)
                .map(|e| (b.dir.clone(), e.clone()))
        })
    }

    /// Drop the entry if it still points at `body_file`. Returns false when a
    /// newer write has replaced it in the meantime.
    async fn forget_entry(&self, bucket: &BucketId, key: &CacheKey, body_file: &str) -> bool {
        let mut buckets = self.buckets.write().await;
        let Some(b) = buckets.iter_mut().find(|b| &b.id == bucket) else {
            return true;
        };
        match b.entries.iter().position(|e| &e.key == key) {
            Some(i) if b.entries[i].body_file != body_file => false,
            Some(i) => {
                b.entries.remove(i);
                true
            }
            None => true,
        }
    }
}

async fn load_bucket(dir: &Path) -> Result<DiskBucket> {
    let meta: BucketMeta = serde_json::from_slice(&fs::read(dir.join(BUCKET_META)).await?)?;

    let mut entries = Vec::new();
    let mut files = fs::read_dir(dir).await?;
    while let Some(file) = files.next_entry().await? {
        let path = file.path();
        let is_entry_meta = path.extension().map(|e| e == "json").unwrap_or(false)
            && path.file_name().map(|n| n != BUCKET_META).unwrap_or(false);
        if !is_entry_meta {
            continue;
        }
        match fs::read(&path).await.map(|raw| serde_json::from_slice::<EntryMeta>(&raw)) {
            Ok(Ok(entry)) => entries.push(entry),
            Ok(Err(e)) => warn!(path = ?path, error = %e, "Skipping corrupt entry metadata"),
            Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable entry metadata"),
        }
    }
    entries.sort_by(|a, b| a.stored_at.cmp(&b.stored_at).then_with(|| a.key.cmp(&b.key)));
    remove_orphans(dir, &entries).await?;

    debug!(bucket = %meta.id, entries = entries.len(), "Loaded bucket");
    Ok(DiskBucket {
        id: meta.id,
        created_at: meta.created_at,
        dir: dir.to_path_buf(),
        entries,
    })
}

/// Remove bodies no metadata points at and metadata never renamed into place
async fn remove_orphans(dir: &Path, entries: &[EntryMeta]) -> Result<()> {
    let mut files = fs::read_dir(dir).await?;
    while let Some(file) = files.next_entry().await? {
        let path = file.path();
        let name = file.file_name().to_string_lossy().into_owned();
        let orphan = match path.extension().and_then(|e| e.to_str()) {
            Some("tmp") => true,
            Some("body") => !entries.iter().any(|e| e.body_file == name),
            _ => false,
        };
        if orphan {
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove orphaned cache file");
            }
        }
    }
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!(path = ?path, error = %e, "Failed to remove cache file");
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, bucket: &BucketId) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        let mut buckets = self.buckets.write().await;
        if buckets.iter().any(|b| &b.id == bucket) {
            return Ok(());
        }

        fs::create_dir_all(&dir).await?;
        let meta = BucketMeta {
            id: bucket.clone(),
            created_at: Utc::now(),
        };
        fs::write(dir.join(BUCKET_META), serde_json::to_vec(&meta)?).await?;

        buckets.push(DiskBucket {
            id: meta.id,
            created_at: meta.created_at,
            dir,
            entries: Vec::new(),
        });
        debug!(bucket = %bucket, "Created bucket");
        Ok(())
    }

    async fn has(&self, bucket: &BucketId) -> bool {
        self.dir_of(bucket).await.is_some()
    }

    async fn keys(&self) -> Vec<BucketId> {
        self.buckets
            .read()
            .await
            .iter()
            .map(|b| b.id.clone())
            .collect()
    }

    async fn delete(&self, bucket: &BucketId) -> Result<bool> {
        let (index, removed) = {
            let mut buckets = self.buckets.write().await;
            let Some(index) = buckets.iter().position(|b| &b.id == bucket) else {
                return Ok(false);
            };
            (index, buckets.remove(index))
        };

        match fs::remove_dir_all(&removed.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Back into the index so a later activation retries
                let mut buckets = self.buckets.write().await;
                if !buckets.iter().any(|b| b.id == removed.id) {
                    let at = index.min(buckets.len());
                    buckets.insert(at, removed);
                }
                return Err(e.into());
            }
        }
        debug!(bucket = %bucket, "Deleted bucket");
        Ok(true)
    }

    async fn put(
        &self,
        bucket: &BucketId,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<()> {
        let dir = match self.dir_of(bucket).await {
            Some(dir) => dir,
            None => {
                self.open(bucket).await?;
                self.bucket_dir(bucket)?
            }
        };

        let name = Self::entry_name(key);
        let token = self.write_token();
        let body_file = format!("{}.{}.body", name, token);
        let meta = EntryMeta {
            key: key.clone(),
            url: response.url,
            status: response.status,
            headers: response.headers,
            kind: response.kind,
            size: response.body.len() as u64,
            stored_at: response.stored_at,
            body_file: body_file.clone(),
        };

        let body_path = dir.join(&body_file);
        let meta_tmp = dir.join(format!("{}.json.{}.tmp", name, token));
        fs::write(&body_path, &response.body).await?;
        if let Err(e) = fs::write(&meta_tmp, serde_json::to_vec(&meta)?).await {
            discard(&body_path).await;
            return Err(e.into());
        }

        let swapped = {
            let mut buckets = self.buckets.write().await;
            match buckets.iter_mut().find(|b| &b.id == bucket) {
                None => Err(CacheError::Storage(format!(
                    "bucket {} was deleted during write",
                    bucket
                ))),
                // Renamed under the index lock so disk and index agree on the winner
                Some(b) => match fs::rename(&meta_tmp, dir.join(format!("{}.json", name))).await {
                    Err(e) => Err(CacheError::from(e)),
                    Ok(()) => Ok(match b.entries.iter_mut().find(|e| &e.key == key) {
                        Some(existing) => Some(std::mem::replace(existing, meta)),
                        None => {
                            b.entries.push(meta);
                            None
                        }
                    }),
                },
            }
        };

        let replaced = match swapped {
            Ok(replaced) => replaced,
            Err(e) => {
                discard(&meta_tmp).await;
                discard(&body_path).await;
                return Err(e);
            }
        };

        if let Some(old) = replaced {
            discard(&dir.join(old.body_file)).await;
        }

        debug!(bucket = %bucket, key = %key, "Stored entry");
        Ok(())
    }

    async fn match_in(&self, bucket: &BucketId, key: &CacheKey) -> Option<ResponseSnapshot> {
        for _ in 0..READ_ATTEMPTS {
            let Some((dir, meta)) = self.lookup(bucket, key).await else {
                break;
            };
            match fs::read(dir.join(&meta.body_file)).await {
                Ok(body) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(ResponseSnapshot {
                        url: meta.url,
                        status: meta.status,
                        headers: meta.headers,
                        body,
                        kind: meta.kind,
                        stored_at: meta.stored_at,
                    });
                }
                Err(e) => {
                    if self.forget_entry(bucket, key, &meta.body_file).await {
                        warn!(bucket = %bucket, key = %key, error = %e, "Failed to read cached body, removing entry");
                        break;
                    }
                    debug!(bucket = %bucket, key = %key, "Entry replaced during read, retrying");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn entries(&self, bucket: &BucketId) -> Vec<CacheKey> {
        self.buckets
            .read()
            .await
            .iter()
            .find(|b| &b.id == bucket)
            .map(|b| b.entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    async fn stats(&self) -> StorageStats {
        let buckets = self.buckets.read().await;
        StorageStats {
            buckets: buckets.len(),
            entries: buckets.iter().map(|b| b.entries.len()).sum(),
            total_size: buckets
                .iter()
                .flat_map(|b| b.entries.iter())
                .map(|e| e.size)
                .sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
