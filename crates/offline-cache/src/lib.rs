//! Offline cache for the Boxing Timer web app
//!
//! Keeps a versioned bucket of the app shell and its CDN libraries so the page
//! runs without a network. Pages are served network-first, everything else
//! cache-first, and each activation garbage-collects older buckets.

pub mod background;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod manifest;
pub mod network;
pub mod request;
pub mod storage;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{CacheError, Result};
pub use interceptor::{FetchInterceptor, FetchOutcome, ResponseSource, Served};
pub use lifecycle::{
    ActivationReport, CurrentBucket, InstallReport, InstallStrategy, LifecycleManager,
    WorkerState,
};
pub use manifest::CacheManifest;
pub use network::{FetchMode, HttpNetwork, Network};
pub use request::{CacheKey, MatchOptions, Request, RequestKind};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use types::{BucketId, ResponseKind, ResponseSnapshot, StorageStats};
pub use worker::{OfflineWorker, WorkerEvent, WorkerReply, SKIP_WAITING_MESSAGE};
