//! Live network access for the worker

use crate::error::{CacheError, Result};
use crate::request::Request;
use crate::types::{ResponseKind, ResponseSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, Method};
use tracing::debug;
use url::{Origin, Url};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Headers that describe a single connection and must not be forwarded
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Whether intermediate HTTP caches may answer the fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Default,
    /// Revalidate with the origin
    NoCache,
}

/// Source of live responses. `Err` means the fetch itself failed; HTTP error
/// statuses come back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<ResponseSnapshot>;
}

/// HTTP client for fetching from the app origin and CDNs
pub struct HttpNetwork {
    client: Client,
    scope_origin: Origin,
}

impl HttpNetwork {
    pub fn new(scope: &Url) -> Self {
        Self {
            client: Client::new(),
            scope_origin: scope.origin(),
        }
    }

    fn classify(&self, url: &Url, headers: &HeaderMap) -> ResponseKind {
        if url.origin() == self.scope_origin {
            ResponseKind::Basic
        } else if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseKind::Cors
        } else {
            ResponseKind::Opaque
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<ResponseSnapshot> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CacheError::Network(format!("invalid method: {}", e)))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if mode == FetchMode::NoCache {
            builder = builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache");
        }

        debug!(url = %request.url, ?mode, "Fetching from network");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let kind = self.classify(&final_url, response.headers());
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %final_url, status, size = body.len(), ?kind, "Fetched from network");

        Ok(ResponseSnapshot {
            url: final_url.into(),
            status,
            headers,
            body,
            kind,
            stored_at: Utc::now(),
        })
    }
}
