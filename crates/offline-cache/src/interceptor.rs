//! Fetch interception: network-first documents, cache-first assets
//!
//! Every lookup reads through the current bucket. Fresh copies are written in
//! the background so a response is never held back by storage.

use crate::background::BackgroundWrites;
use crate::lifecycle::CurrentBucket;
use crate::network::{FetchMode, Network};
use crate::request::{CacheKey, MatchOptions, Request, RequestKind};
use crate::storage::CacheStorage;
use crate::types::{BucketId, ResponseSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Partial content cannot be replayed as a full response
const PARTIAL_CONTENT: u16 = 206;

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    /// Exact match in the current bucket
    Cache,
    /// The root document, served in place of what was asked for
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Served {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl Served {
    fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the caller fetches normally
    Passthrough,
    /// Intercepted. `None` when network and every fallback missed.
    Respond(Option<Served>),
}

pub struct FetchInterceptor {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    current: CurrentBucket,
    root_document: CacheKey,
    asset_match: MatchOptions,
    writes: Arc<BackgroundWrites>,
}

impl FetchInterceptor {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        current: CurrentBucket,
        root_document: &Url,
        asset_match: MatchOptions,
    ) -> Self {
        Self {
            storage,
            network,
            current,
            root_document: CacheKey::from_url(root_document),
            asset_match,
            writes: Arc::new(BackgroundWrites::new()),
        }
    }

    pub fn writes(&self) -> &BackgroundWrites {
        &self.writes
    }

    pub async fn handle(&self, request: &Request) -> FetchOutcome {
        if !request.is_read() {
            return FetchOutcome::Passthrough;
        }
        let Some(bucket) = self.current.get().await else {
            debug!(url = %request.url, "No current bucket, passing through");
            return FetchOutcome::Passthrough;
        };

        let served = match request.kind() {
            RequestKind::Document => self.network_first(&bucket, request).await,
            RequestKind::Asset => self.cache_first(&bucket, request).await,
        };

        debug!(
            url = %request.url,
            source = ?served.as_ref().map(|s| s.source),
            "Intercepted fetch"
        );
        FetchOutcome::Respond(served)
    }

    async fn network_first(&self, bucket: &BucketId, request: &Request) -> Option<Served> {
        let key = request.cache_key();
        match self.network.fetch(request, FetchMode::NoCache).await {
            Ok(live) => {
                if live.status != PARTIAL_CONTENT {
                    self.store_in_background(bucket, key, live.clone());
                }
                Some(Served::new(live, ResponseSource::Network))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Document fetch failed, trying cache");
                if let Some(cached) = self.storage.match_in(bucket, &key).await {
                    return Some(Served::new(cached, ResponseSource::Cache));
                }
                self.root_fallback(bucket).await
            }
        }
    }

    async fn cache_first(&self, bucket: &BucketId, request: &Request) -> Option<Served> {
        let key = request.cache_key();
        if let Some(cached) = self.storage.match_with(bucket, &key, self.asset_match).await {
            return Some(Served::new(cached, ResponseSource::Cache));
        }

        match self.network.fetch(request, FetchMode::Default).await {
            Ok(live) => {
                if live.is_ok() {
                    self.store_in_background(bucket, key, live.clone());
                }
                Some(Served::new(live, ResponseSource::Network))
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Asset fetch failed, trying root document");
                self.root_fallback(bucket).await
            }
        }
    }

    async fn root_fallback(&self, bucket: &BucketId) -> Option<Served> {
        self.storage
            .match_in(bucket, &self.root_document)
            .await
            .map(|root| Served::new(root, ResponseSource::Fallback))
    }

    /// Best effort: failures are logged by `BackgroundWrites`, never returned
    fn store_in_background(&self, bucket: &BucketId, key: CacheKey, response: ResponseSnapshot) {
        let storage = self.storage.clone();
        let bucket = bucket.clone();
        self.writes
            .submit(format!("{} {}", bucket, key), async move {
                storage.put(&bucket, &key, response).await
            });
    }
}
