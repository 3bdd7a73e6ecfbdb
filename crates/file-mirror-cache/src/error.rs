//! Error types for the file mirror cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// The resolver produced no download URL
    ResolveFailed(String),
    /// Transport error or non-success status while downloading
    DownloadFailed(String),
    Io(Box<std::io::Error>),
    /// The identifier cannot be used as a file name in the cache directory
    InvalidIdentifier(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::ResolveFailed(id) => write!(f, "Failed to resolve download URL for {}", id),
            CacheError::DownloadFailed(msg) => write!(f, "Download failed: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::InvalidIdentifier(id) => write!(f, "Invalid file identifier: {:?}", id),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        // Download URLs carry credentials; never surface them
        CacheError::DownloadFailed(err.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
