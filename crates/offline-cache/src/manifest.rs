//! Cache manifest: bucket naming and the fixed asset list

use crate::error::{CacheError, Result};
use crate::request::MatchOptions;
use crate::types::BucketId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

const DEFAULT_APP_NAME: &str = "boxing-timer";
const DEFAULT_VERSION: &str = "v5";
const DEFAULT_ROOT_DOCUMENT: &str = "./index.html";

/// Describes one version of the offline bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub app_name: String,
    /// Bump to force a new bucket and drop the old one on activation
    pub version: String,
    #[serde(default = "default_root_document")]
    pub root_document: String,
    /// Scope-relative paths or absolute cross-origin URLs
    pub assets: Vec<String>,
    /// Activate right after install instead of waiting for pages to close
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting: bool,
    #[serde(default)]
    pub asset_match: MatchOptions,
}

fn default_root_document() -> String {
    DEFAULT_ROOT_DOCUMENT.to_string()
}

fn default_skip_waiting() -> bool {
    true
}

impl CacheManifest {
    /// The Boxing Timer app shell plus its CDN libraries
    pub fn boxing_timer() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            root_document: default_root_document(),
            assets: [
                "./",
                "./index.html",
                "./manifest.json",
                "./icon-192.png",
                "./icon-512.png",
                "https://cdn.tailwindcss.com",
                "https://unpkg.com/react@18/umd/react.development.js",
                "https://unpkg.com/react-dom@18/umd/react-dom.development.js",
                "https://unpkg.com/@babel/standalone/babel.min.js",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_waiting: true,
            asset_match: MatchOptions::default(),
        }
    }

    pub fn bucket_id(&self) -> BucketId {
        BucketId::new(&self.app_name, &self.version)
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: CacheManifest = serde_json::from_str(json)?;
        if manifest.app_name.is_empty() || manifest.version.is_empty() {
            return Err(CacheError::Serialization(
                "manifest needs a non-empty app_name and version".to_string(),
            ));
        }
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Resolve every asset locator against the app scope, keeping list order
    pub fn resolve_assets(&self, scope: &Url) -> Result<Vec<Url>> {
        self.assets
            .iter()
            .map(|locator| resolve_locator(scope, locator))
            .collect()
    }

    pub fn root_document_url(&self, scope: &Url) -> Result<Url> {
        resolve_locator(scope, &self.root_document)
    }
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self::boxing_timer()
    }
}

fn resolve_locator(scope: &Url, locator: &str) -> Result<Url> {
    scope
        .join(locator)
        .map_err(|e| CacheError::InvalidLocator(format!("{}: {}", locator, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_manifest() {
        let manifest = CacheManifest::default();
        assert_eq!(manifest.bucket_id().as_str(), "boxing-timer-v5");
        assert_eq!(manifest.root_document, "./index.html");
        assert_eq!(manifest.assets.len(), 9);
        assert!(manifest.skip_waiting);
    }

    #[test]
    fn test_resolve_assets_against_scope() {
        let scope = Url::parse("https://user.github.io/Timer/").unwrap();
        let urls = CacheManifest::boxing_timer().resolve_assets(&scope).unwrap();

        assert_eq!(urls[0].as_str(), "https://user.github.io/Timer/");
        assert_eq!(urls[1].as_str(), "https://user.github.io/Timer/index.html");
        assert_eq!(urls[5].as_str(), "https://cdn.tailwindcss.com/");
        assert_eq!(
            urls[6].as_str(),
            "https://unpkg.com/react@18/umd/react.development.js"
        );
    }

    #[test]
    fn test_root_document_url() {
        let scope = Url::parse("http://localhost:8080/").unwrap();
        let root = CacheManifest::default().root_document_url(&scope).unwrap();
        assert_eq!(root.as_str(), "http://localhost:8080/index.html");
    }

    #[test]
    fn test_with_version_changes_bucket() {
        let manifest = CacheManifest::default().with_version("v6");
        assert_eq!(manifest.bucket_id().as_str(), "boxing-timer-v6");
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{ "app_name": "app", "version": "v1", "assets": ["/", "/index.html"] }"#;
        let manifest = CacheManifest::from_json(json).unwrap();
        assert_eq!(manifest.bucket_id().as_str(), "app-v1");
        assert_eq!(manifest.root_document, "./index.html");
        assert!(manifest.skip_waiting);
        assert!(!manifest.asset_match.ignore_search);
    }

    #[test]
    fn test_from_json_rejects_empty_version() {
        let json = r#"{ "app_name": "app", "version": "", "assets": [] }"#;
        assert!(CacheManifest::from_json(json).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(
            &path,
            r#"{ "app_name": "app", "version": "v2", "assets": ["/"], "skip_waiting": false }"#,
        )
        .await
        .unwrap();

        let manifest = CacheManifest::load(&path).await.unwrap();
        assert_eq!(manifest.version, "v2");
        assert!(!manifest.skip_waiting);
    }
}
