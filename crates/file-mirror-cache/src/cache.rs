//! File mirror with in-memory access tracking

use crate::error::{CacheError, Result};
use crate::invalidation::DeferredInvalidations;
use crate::types::{CacheConfig, CacheEntry, CacheStats};
use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telegram_file_resolver::DownloadResolver;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Local mirror of remotely hosted files.
///
/// The in-memory map and the cache directory are owned exclusively by this
/// type. The map lock is never held across network I/O, so two requests for
/// the same cold file may both download it; each download lands in its own
/// temporary file. Renaming into place and deleting cached files both happen
/// under the map write lock, so a mapped entry always has its file.
pub struct MirrorCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    invalidations: DeferredInvalidations,
    config: CacheConfig,
    resolver: Arc<dyn DownloadResolver>,
    client: Client,
    hits: AtomicU64,
    misses: AtomicU64,
    download_seq: AtomicU64,
}

impl MirrorCache {
    pub fn new(config: CacheConfig, resolver: Arc<dyn DownloadResolver>, client: Client) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            invalidations: DeferredInvalidations::default(),
            config,
            resolver,
            client,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            download_seq: AtomicU64::new(0),
        }
    }

    /// Initialize the cache by ensuring the cache directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.config.cache_dir).await?;
        info!(cache_dir = ?self.config.cache_dir, "Cache initialized");
        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the local path of `id`, downloading it on a miss.
    ///
    /// Any access cancels a pending deferred invalidation of the same file.
    pub async fn get_or_fetch(&self, id: &str) -> Result<PathBuf> {
        validate_identifier(id)?;

        if self.invalidations.cancel(id) {
            debug!(id, "Cancelled pending invalidation");
        }

        let cached = {
            let entries = self.entries.read().await;
            entries.get(id).map(|entry| entry.path.clone())
        };

        if let Some(path) = cached {
            if fs::try_exists(&path).await.unwrap_or(false) {
                let mut entries = self.entries.write().await;
                // A sweep may have evicted the entry since the read
                if let Some(entry) = entries.get_mut(id) {
                    entry.last_access = Utc::now();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(id, "Cache hit");
                    return Ok(path);
                }
            } else {
                warn!(id, path = ?path, "Cached file missing on disk, fetching again");
                let mut entries = self.entries.write().await;
                // A concurrent fetch may have restored the file meanwhile
                if !fs::try_exists(&path).await.unwrap_or(false) {
                    entries.remove(id);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(id, "Cache miss");

        let partial = self.fetch(id).await?;
        let path = self.config.cache_dir.join(id);

        let mut entries = self.entries.write().await;
        if let Err(e) = fs::rename(&partial, &path).await {
            drop(entries);
            remove_if_exists(&partial).await;
            return Err(e.into());
        }
        entries.insert(
            id.to_string(),
            CacheEntry {
                path: path.clone(),
                last_access: Utc::now(),
            },
        );

        Ok(path)
    }

    /// Resolve and download `id` into a private temporary file, returning its path
    async fn fetch(&self, id: &str) -> Result<PathBuf> {
        let url = self
            .resolver
            .resolve(id)
            .await
            .ok_or_else(|| CacheError::ResolveFailed(id.to_string()))?;

        let seq = self.download_seq.fetch_add(1, Ordering::Relaxed);
        let partial = self.config.cache_dir.join(format!(".{}.{}.part", id, seq));

        match self.download(&url, &partial).await {
            Ok(size) => {
                debug!(id, size, "Downloaded file into cache");
                Ok(partial)
            }
            Err(e) => {
                warn!(id, error = %e, "Download failed");
                remove_if_exists(&partial).await;
                Err(e)
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut file = fs::File::create(dest).await?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CacheError::DownloadFailed(format!(
                "remote returned status {}",
                response.status()
            )));
        }

        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// Drop `id` from the cache and delete its file; absent entries are ignored
    pub async fn invalidate(&self, id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(id) {
            remove_if_exists(&entry.path).await;
            info!(id, "Invalidated cached file");
        }
    }

    /// Invalidate `id` after `delay` unless it is accessed again first
    pub fn schedule_invalidation(self: &Arc<Self>, id: &str, delay: Duration) {
        self.invalidations.schedule(id, |ticket| {
            let cache = Arc::clone(self);
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if cache.invalidations.claim(&id, ticket) {
                    cache.invalidate(&id).await;
                }
            })
            .abort_handle()
        });
        debug!(id, delay_ms = delay.as_millis() as u64, "Scheduled invalidation");
    }

    /// Cancel a pending deferred invalidation, returning whether one existed
    pub fn cancel_invalidation(&self, id: &str) -> bool {
        self.invalidations.cancel(id)
    }

    /// Identifiers with a deferred invalidation still pending
    pub fn pending_invalidations(&self) -> Vec<String> {
        self.invalidations.ids()
    }

    /// Evict every entry idle for longer than the TTL, returning how many
    pub async fn sweep(&self) -> usize {
        let Some(cutoff) = TimeDelta::from_std(self.config.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let expired: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| entry.last_access < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for id in &expired {
            // Skip entries touched since the scan
            let still_idle = entries
                .get(id)
                .is_some_and(|entry| entry.last_access < cutoff);
            if !still_idle {
                continue;
            }
            if let Some(entry) = entries.remove(id) {
                remove_if_exists(&entry.path).await;
                debug!(path = ?entry.path, "Evicted idle cache entry");
                removed += 1;
            }
        }
        drop(entries);

        if removed > 0 {
            info!(count = removed, "Swept expired cache entries");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` for the life of the process
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pending_invalidations: self.invalidations.len(),
        }
    }
}

/// Identifiers double as file names, so they must be one plain path component
fn validate_identifier(id: &str) -> Result<()> {
    let mut components = Path::new(id).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();

    if !single_normal || id.contains(|c| c == '/' || c == '\\') {
        return Err(CacheError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove cached file"),
    }
}
