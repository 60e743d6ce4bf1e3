//! Cache lifecycle: install, activate and force-activate
//!
//! A bucket is populated at install time, becomes current at activation, and
//! every other bucket is deleted by that same activation. Asset failures never
//! fail an install; deletion failures never fail an activation.

use crate::error::{CacheError, Result};
use crate::manifest::CacheManifest;
use crate::network::{FetchMode, Network};
use crate::request::{CacheKey, Request};
use crate::storage::CacheStorage;
use crate::types::BucketId;
use futures::future::{join_all, try_join_all};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to activate
    Installed,
    Activating,
    Activated,
    /// Install could not even open its bucket
    Redundant,
}

/// Shared handle naming the bucket fetches read through
#[derive(Debug, Clone, Default)]
pub struct CurrentBucket(Arc<RwLock<Option<BucketId>>>);

impl CurrentBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<BucketId> {
        self.0.read().await.clone()
    }

    pub async fn set(&self, bucket: BucketId) {
        *self.0.write().await = Some(bucket);
    }
}

/// Which install strategy populated the bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStrategy {
    /// Every asset fetched and stored in one all-or-nothing pass
    Bulk,
    /// Bulk failed; each asset attempted on its own
    PerAsset,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub locator: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub bucket: BucketId,
    pub strategy: InstallStrategy,
    pub stored: Vec<CacheKey>,
    pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub current: BucketId,
    pub deleted: Vec<BucketId>,
    pub failed_deletions: Vec<BucketId>,
    pub claimed_clients: usize,
}

/// A page the worker may control
#[derive(Debug, Clone)]
struct ClientInfo {
    id: u64,
    controlled: bool,
}

/// Open pages and whether the active bucket controls them
#[derive(Debug, Default)]
pub struct Clients {
    next_id: AtomicU64,
    open: RwLock<Vec<ClientInfo>>,
}

impl Clients {
    pub async fn open(&self, url: &str, controlled: bool) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.open.write().await.push(ClientInfo { id, controlled });
        debug!(id, url, controlled, "Page opened");
        id
    }

    pub async fn close(&self, id: u64) -> bool {
        let mut open = self.open.write().await;
        let before = open.len();
        open.retain(|c| c.id != id);
        open.len() != before
    }

    /// Take control of every open page, returning how many there are
    pub async fn claim(&self) -> usize {
        let mut open = self.open.write().await;
        for client in open.iter_mut() {
            client.controlled = true;
        }
        open.len()
    }

    pub async fn controlled(&self) -> usize {
        self.open.read().await.iter().filter(|c| c.controlled).count()
    }
}

/// Owns bucket creation, population, promotion and garbage collection
pub struct LifecycleManager {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    manifest: CacheManifest,
    scope: Url,
    state: RwLock<WorkerState>,
    current: CurrentBucket,
    skip_waiting: AtomicBool,
    clients: Clients,
}

impl LifecycleManager {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        manifest: CacheManifest,
        scope: Url,
    ) -> Self {
        Self {
            storage,
            network,
            manifest,
            scope,
            state: RwLock::new(WorkerState::Parsed),
            current: CurrentBucket::new(),
            skip_waiting: AtomicBool::new(false),
            clients: Clients::default(),
        }
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    pub fn current_bucket(&self) -> CurrentBucket {
        self.current.clone()
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        debug!(?state, "Worker state changed");
    }

    /// Install the manifest's bucket with the manifest's asset list
    pub async fn install(&self) -> Result<InstallReport> {
        let assets = self.manifest.resolve_assets(&self.scope)?;
        let report = self
            .install_bucket(&self.manifest.bucket_id(), &assets)
            .await?;

        if self.manifest.skip_waiting {
            self.force_activate();
        }
        Ok(report)
    }

    /// Open `bucket` and store as many of `assets` as the network allows.
    ///
    /// Tries the all-or-nothing bulk pass first, then falls back to attempting
    /// each asset independently. Only a failure to open the bucket is an error.
    pub async fn install_bucket(&self, bucket: &BucketId, assets: &[Url]) -> Result<InstallReport> {
        self.set_state(WorkerState::Installing).await;
        info!(bucket = %bucket, assets = assets.len(), "Installing bucket");

        if let Err(e) = self.storage.open(bucket).await {
            warn!(bucket = %bucket, error = %e, "Failed to open bucket");
            self.set_state(WorkerState::Redundant).await;
            return Err(e);
        }

        let report = match self.add_all(bucket, assets).await {
            Ok(stored) => InstallReport {
                bucket: bucket.clone(),
                strategy: InstallStrategy::Bulk,
                stored,
                failed: Vec::new(),
            },
            Err(e) => {
                debug!(bucket = %bucket, error = %e, "Bulk install failed, caching assets one by one");
                self.add_each(bucket, assets).await
            }
        };

        self.set_state(WorkerState::Installed).await;
        info!(
            bucket = %bucket,
            strategy = ?report.strategy,
            stored = report.stored.len(),
            failed = report.failed.len(),
            "Install complete"
        );
        Ok(report)
    }

    /// Fetch everything, store only if every response is OK
    async fn add_all(&self, bucket: &BucketId, assets: &[Url]) -> Result<Vec<CacheKey>> {
        let fetches = assets.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self.network.fetch(&request, FetchMode::Default).await?;
            if !response.is_ok() {
                return Err(CacheError::Network(format!(
                    "{} returned status {}",
                    url, response.status
                )));
            }
            Ok((request.cache_key(), response))
        });
        let responses = try_join_all(fetches).await?;

        let mut stored = Vec::with_capacity(responses.len());
        for (key, response) in responses {
            self.storage.put(bucket, &key, response).await?;
            stored.push(key);
        }
        Ok(stored)
    }

    /// Attempt every asset independently and settle all of them
    async fn add_each(&self, bucket: &BucketId, assets: &[Url]) -> InstallReport {
        let attempts = assets.iter().map(|url| async move {
            let outcome = self.add_one(bucket, url).await;
            (url, outcome)
        });

        let mut stored = Vec::new();
        let mut failed = Vec::new();
        for (url, outcome) in join_all(attempts).await {
            match outcome {
                Ok(key) => stored.push(key),
                Err(e) => {
                    debug!(url = %url, error = %e, "Skipping asset");
                    failed.push(FailedAsset {
                        locator: url.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        InstallReport {
            bucket: bucket.clone(),
            strategy: InstallStrategy::PerAsset,
            stored,
            failed,
        }
    }

    async fn add_one(&self, bucket: &BucketId, url: &Url) -> Result<CacheKey> {
        let request = Request::get(url.clone());
        let response = self.network.fetch(&request, FetchMode::NoCache).await?;
        if !(response.is_ok() || response.is_opaque()) {
            return Err(CacheError::Network(format!(
                "status {} is not cacheable",
                response.status
            )));
        }

        let key = request.cache_key();
        self.storage.put(bucket, &key, response).await?;
        Ok(key)
    }

    /// Whether a waiting install may activate now
    pub async fn can_activate(&self) -> bool {
        if self.skip_waiting.load(Ordering::SeqCst) {
            return true;
        }
        match self.current.get().await {
            None => true,
            Some(current) if current == self.manifest.bucket_id() => true,
            Some(_) => self.clients.controlled().await == 0,
        }
    }

    /// Skip the wait for controlled pages to close
    pub fn force_activate(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            info!("Skip waiting requested");
        }
    }

    /// Activate the manifest's bucket
    pub async fn activate(&self) -> Result<ActivationReport> {
        match self.state().await {
            WorkerState::Installed | WorkerState::Activated => {}
            other => {
                return Err(CacheError::Lifecycle(format!(
                    "cannot activate while {:?}",
                    other
                )))
            }
        }
        Ok(self.activate_bucket(&self.manifest.bucket_id()).await)
    }

    /// Delete every bucket except `current`, make it current and claim all pages
    pub async fn activate_bucket(&self, current: &BucketId) -> ActivationReport {
        self.set_state(WorkerState::Activating).await;

        let stale: Vec<BucketId> = self
            .storage
            .keys()
            .await
            .into_iter()
            .filter(|bucket| bucket != current)
            .collect();

        let deletions = stale.iter().map(|bucket| async move {
            let outcome = self.storage.delete(bucket).await;
            (bucket, outcome)
        });

        let mut deleted = Vec::new();
        let mut failed_deletions = Vec::new();
        for (bucket, outcome) in join_all(deletions).await {
            match outcome {
                Ok(_) => deleted.push(bucket.clone()),
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to delete stale bucket");
                    failed_deletions.push(bucket.clone());
                }
            }
        }

        self.current.set(current.clone()).await;
        let claimed_clients = self.clients.claim().await;
        self.set_state(WorkerState::Activated).await;

        info!(
            current = %current,
            deleted = deleted.len(),
            claimed_clients,
            "Activation complete"
        );
        ActivationReport {
            current: current.clone(),
            deleted,
            failed_deletions,
            claimed_clients,
        }
    }
}
