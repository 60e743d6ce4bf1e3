//! Offline worker: consumes the host's lifecycle and fetch signals

use crate::error::Result;
use crate::interceptor::{FetchInterceptor, FetchOutcome};
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleManager};
use crate::manifest::CacheManifest;
use crate::network::Network;
use crate::request::Request;
use crate::storage::CacheStorage;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Control message that lets a waiting install activate immediately
pub const SKIP_WAITING_MESSAGE: &str = "SKIP_WAITING";

/// Signals delivered by the hosting runtime
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(String),
}

#[derive(Debug, Clone)]
pub enum WorkerReply {
    Installed(InstallReport),
    Activated(ActivationReport),
    /// Pages controlled by the previous version are still open
    Waiting,
    Fetched(FetchOutcome),
    MessageHandled { force_activated: bool },
}

pub struct OfflineWorker {
    lifecycle: LifecycleManager,
    interceptor: FetchInterceptor,
}

impl OfflineWorker {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        manifest: CacheManifest,
        scope: Url,
    ) -> Result<Self> {
        let root_document = manifest.root_document_url(&scope)?;
        let asset_match = manifest.asset_match;
        let lifecycle = LifecycleManager::new(storage.clone(), network.clone(), manifest, scope);
        let interceptor = FetchInterceptor::new(
            storage,
            network,
            lifecycle.current_bucket(),
            &root_document,
            asset_match,
        );

        Ok(Self {
            lifecycle,
            interceptor,
        })
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<WorkerReply> {
        match event {
            WorkerEvent::Install => Ok(WorkerReply::Installed(self.install().await?)),
            WorkerEvent::Activate => Ok(match self.activate().await? {
                Some(report) => WorkerReply::Activated(report),
                None => WorkerReply::Waiting,
            }),
            WorkerEvent::Fetch(request) => Ok(WorkerReply::Fetched(self.fetch(&request).await)),
            WorkerEvent::Message(message) => Ok(WorkerReply::MessageHandled {
                force_activated: self.message(&message),
            }),
        }
    }

    pub async fn install(&self) -> Result<InstallReport> {
        self.lifecycle.install().await
    }

    /// Activate if allowed; `None` while the install has to keep waiting
    pub async fn activate(&self) -> Result<Option<ActivationReport>> {
        if !self.lifecycle.can_activate().await {
            info!(
                bucket = %self.lifecycle.manifest().bucket_id(),
                "Activation deferred until controlled pages close"
            );
            return Ok(None);
        }
        self.lifecycle.activate().await.map(Some)
    }

    pub async fn fetch(&self, request: &Request) -> FetchOutcome {
        self.interceptor.handle(request).await
    }

    /// Returns whether the message triggered force-activation
    pub fn message(&self, message: &str) -> bool {
        if message == SKIP_WAITING_MESSAGE {
            self.lifecycle.force_activate();
            true
        } else {
            debug!(control = message, "Ignoring unknown control message");
            false
        }
    }

    /// Startup sequence: install, then activate unless the install must wait
    pub async fn install_and_activate(&self) -> Result<(InstallReport, Option<ActivationReport>)> {
        let installed = self.install().await?;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }
}
