//! Core types shared by storage, network and the worker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a versioned storage bucket, `<app-name>-<version-tag>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    pub fn new(app_name: &str, version: &str) -> Self {
        Self(format!("{}-{}", app_name, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BucketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BucketId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How much of a response the requesting page is allowed to inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response
    Basic,
    /// Cross-origin response that opted in to sharing
    Cors,
    /// Cross-origin response the page cannot inspect, but can replay
    Opaque,
}

/// A stored or live response: status, headers and the full body
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
    pub stored_at: DateTime<Utc>,
}

impl ResponseSnapshot {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
            stored_at: Utc::now(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Status in the 2xx range. Never true for opaque responses, whose status
    /// the page cannot see.
    pub fn is_ok(&self) -> bool {
        !self.is_opaque() && (200..300).contains(&self.status)
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }

    /// Case-insensitive header lookup, first value wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type")
            .unwrap_or("application/octet-stream")
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Statistics about the bucket namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub buckets: usize,
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}
