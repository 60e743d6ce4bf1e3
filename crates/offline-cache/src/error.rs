//! Error types for the offline cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Http(Box<reqwest::Error>),
    Network(String),
    Storage(String),
    Io(Box<std::io::Error>),
    Serialization(String),
    InvalidLocator(String),
    Lifecycle(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Http(err) => write!(f, "HTTP error: {}", err),
            CacheError::Network(msg) => write!(f, "Network error: {}", msg),
            CacheError::Storage(msg) => write!(f, "Storage error: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::InvalidLocator(msg) => write!(f, "Invalid locator: {}", msg),
            CacheError::Lifecycle(msg) => write!(f, "Lifecycle error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Http(err) => Some(err.as_ref()),
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Http(Box::new(err))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for CacheError {
    fn from(err: url::ParseError) -> Self {
        CacheError::InvalidLocator(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
