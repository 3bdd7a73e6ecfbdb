//! tgstate file server
//!
//! Serves files stored in a Telegram channel as plain HTTP resources, with a
//! local disk mirror, byte-range delivery for video, and reassembly of files
//! that were uploaded as multiple chunks.

mod blob;
mod error;
mod server;
mod sniff;
#[cfg(test)]
mod test_support;
mod types;

use crate::blob::{BlobAssembler, RetryPolicy};
use crate::error::{Result, ServerError};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use file_mirror_cache::{CacheConfig, MirrorCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telegram_file_resolver::{DownloadResolver, TelegramResolver, DEFAULT_API_BASE};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("tgstate_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting tgstate file server...");

    // Load configuration from environment
    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Bot API: {}", config.api_base);
    info!("Cache dir: {:?}", config.cache.cache_dir);
    info!("Cache TTL: {} seconds", config.cache.ttl.as_secs());
    info!(
        "Sweep interval: {} seconds",
        config.cache.sweep_interval.as_secs()
    );

    let client = reqwest::Client::new();
    let resolver: Arc<dyn DownloadResolver> = Arc::new(TelegramResolver::with_api_base(
        client.clone(),
        config.bot_token,
        &config.api_base,
    ));

    // Create cache and start the periodic sweep
    let cache = Arc::new(MirrorCache::new(
        config.cache,
        resolver.clone(),
        client.clone(),
    ));
    cache.init().await?;
    cache.clone().spawn_sweeper();

    let assembler = BlobAssembler::new(resolver, client, config.chunk_retry);

    // Create shared state
    let state: SharedState = Arc::new(ServerState::new(cache, assembler));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

fn load_config() -> Result<ServerConfig> {
    let defaults = ServerConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let bot_token = std::env::var("BOT_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| ServerError::Config("BOT_TOKEN is not set".to_string()))?;

    let api_base = std::env::var("TG_API_BASE")
        .ok()
        .filter(|base| !base.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache.cache_dir);

    let ttl = env_u64("CACHE_TTL_SECS")
        .map(Duration::from_secs)
        .unwrap_or(defaults.cache.ttl);

    let sweep_interval = env_u64("SWEEP_INTERVAL_SECS")
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(defaults.cache.sweep_interval);

    let max_attempts = std::env::var("CHUNK_RETRY_ATTEMPTS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|attempts| *attempts > 0)
        .unwrap_or(defaults.chunk_retry.max_attempts);

    Ok(ServerConfig {
        port,
        bot_token,
        api_base,
        cache: CacheConfig {
            cache_dir,
            ttl,
            sweep_interval,
        },
        chunk_retry: RetryPolicy {
            max_attempts,
            ..defaults.chunk_retry
        },
    })
}
