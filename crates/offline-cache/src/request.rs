//! Intercepted requests, their classification and cache keys

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A read request issued by the controlled page
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

/// Which retrieval strategy a request gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Full markup page: network-first
    Document,
    /// Script, style, image, manifest: cache-first
    Asset,
}

impl Request {
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Only GET requests are ever intercepted
    pub fn is_read(&self) -> bool {
        self.method == "GET"
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn kind(&self) -> RequestKind {
        let accepts_html = self
            .header("accept")
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false);
        let path = self.url.path();

        if accepts_html || path.ends_with('/') || path.ends_with(".html") {
            RequestKind::Document
        } else {
            RequestKind::Asset
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_url(&self.url)
    }
}

/// Storage key for an entry: the request URL without its fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// The same key with its query string discarded
    pub fn without_search(&self) -> CacheKey {
        match Url::parse(&self.0) {
            Ok(mut url) => {
                url.set_query(None);
                Self(url.into())
            }
            Err(_) => match self.0.split_once('?') {
                Some((base, _)) => Self(base.to_string()),
                None => self.clone(),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Url> for CacheKey {
    fn from(url: &Url) -> Self {
        Self::from_url(url)
    }
}

/// Options for looking up an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Compare keys with their query strings removed
    #[serde(default)]
    pub ignore_search: bool,
}
