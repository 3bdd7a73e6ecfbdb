//! Core types for the tgstate file server

use crate::blob::RetryPolicy;
use file_mirror_cache::{CacheConfig, CacheStats};
use serde::Serialize;
use telegram_file_resolver::DEFAULT_API_BASE;

/// Configuration for the file server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bot_token: String,
    pub api_base: String,
    pub cache: CacheConfig,
    pub chunk_retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8088,
            bot_token: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            cache: CacheConfig::default(),
            chunk_retry: RetryPolicy::default(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
