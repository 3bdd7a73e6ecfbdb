//! Reassembly of files stored as multiple remote chunks
//!
//! Files larger than the remote service's object limit are uploaded as a
//! series of chunks plus a small plain-text index ("manifest"):
//!
//! ```text
//! tgstate-blob
//! holiday.mp4
//! size1073741824
//! <chunk id>
//! <chunk id>
//! ```
//!
//! The size line is optional. The manifest is requested as `blob-<index id>`.

use crate::error::AssembleError;
use futures::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use telegram_file_resolver::DownloadResolver;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, AssembleError>;

/// Identifier prefix that routes a request to manifest delivery
pub const MANIFEST_PREFIX: &str = "blob-";
/// First line of every manifest
pub const MANIFEST_MAGIC: &str = "tgstate-blob";
/// Tag introducing the optional declared size on the third line
pub const SIZE_TAG: &str = "size";

/// Index objects are tiny; anything larger is not a manifest
const MAX_MANIFEST_LEN: usize = 1024 * 1024;

/// A parsed manifest. Never persisted; parsed once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobManifest {
    pub filename: String,
    /// Total size exactly as written in the manifest
    pub declared_size: Option<String>,
    pub chunks: Vec<String>,
}

impl BlobManifest {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

        if lines.next().map(str::trim) != Some(MANIFEST_MAGIC) {
            return Err(AssembleError::InvalidManifest(format!(
                "missing {} marker",
                MANIFEST_MAGIC
            )));
        }

        let filename = lines
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AssembleError::InvalidManifest("missing filename".to_string()))?
            .to_string();

        let mut declared_size = None;
        let mut chunks = Vec::new();
        for (i, line) in lines.enumerate() {
            if i == 0 {
                if let Some(size) = line.strip_prefix(SIZE_TAG) {
                    declared_size = Some(size.trim().to_string());
                    continue;
                }
            }
            let id = line.trim();
            if !id.is_empty() {
                chunks.push(id.to_string());
            }
        }

        if chunks.is_empty() {
            return Err(AssembleError::InvalidManifest(
                "manifest lists no chunks".to_string(),
            ));
        }

        Ok(Self {
            filename,
            declared_size,
            chunks,
        })
    }

    /// Declared size as a byte count, when it is a plain integer
    pub fn content_length(&self) -> Option<u64> {
        self.declared_size.as_deref()?.parse().ok()
    }
}

/// Bounded exponential backoff for resolution failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Streams the chunks of a manifest, in order, into a single output
#[derive(Clone)]
pub struct BlobAssembler {
    resolver: Arc<dyn DownloadResolver>,
    client: Client,
    retry: RetryPolicy,
}

impl BlobAssembler {
    pub fn new(resolver: Arc<dyn DownloadResolver>, client: Client, retry: RetryPolicy) -> Self {
        Self {
            resolver,
            client,
            retry,
        }
    }

    async fn resolve_with_retry(&self, id: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(url) = self.resolver.resolve(id).await {
                return Ok(url);
            }
            if attempt >= self.retry.max_attempts {
                return Err(AssembleError::ChunkUnresolvable {
                    id: id.to_string(),
                    attempts: attempt,
                });
            }
            let delay = self.retry.delay_after(attempt);
            warn!(id, attempt, delay_ms = delay.as_millis() as u64, "Chunk unresolved, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn request(&self, id: &str) -> Result<reqwest::Response> {
        let url = self.resolve_with_retry(id).await?;
        let unavailable = |reason: String| AssembleError::ChunkUnavailable {
            id: id.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "remote returned status {}",
                response.status()
            )));
        }
        Ok(response)
    }

    /// Download and parse the index object named `index_id`
    pub async fn fetch_manifest(&self, index_id: &str) -> Result<BlobManifest> {
        let response = self.request(index_id).await?;

        if response
            .content_length()
            .is_some_and(|len| len > MAX_MANIFEST_LEN as u64)
        {
            return Err(AssembleError::InvalidManifest(
                "index object too large".to_string(),
            ));
        }

        let mut body = response.bytes_stream();
        let mut text = Vec::new();
        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| AssembleError::ChunkUnavailable {
                id: index_id.to_string(),
                reason: e.without_url().to_string(),
            })?;
            text.extend_from_slice(&piece);
            if text.len() > MAX_MANIFEST_LEN {
                return Err(AssembleError::InvalidManifest(
                    "index object too large".to_string(),
                ));
            }
        }

        let text = String::from_utf8(text)
            .map_err(|_| AssembleError::InvalidManifest("index is not UTF-8".to_string()))?;
        BlobManifest::parse(&text)
    }

    /// Write every chunk, strictly in order, to `output`; returns bytes written.
    ///
    /// A failure part way leaves what was already written in place.
    pub async fn stream<W>(&self, chunk_ids: &[String], output: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        for id in chunk_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            let response = self.request(id).await?;

            let mut body = response.bytes_stream();
            while let Some(piece) = body.next().await {
                let piece = piece.map_err(|e| AssembleError::ChunkUnavailable {
                    id: id.to_string(),
                    reason: e.without_url().to_string(),
                })?;
                output.write_all(&piece).await?;
                written += piece.len() as u64;
            }
            debug!(id, written, "Streamed chunk");
        }
        output.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_origin, FakeResolver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        }
    }

    /// Fails the first `failures` resolutions, then delegates
    struct FlakyResolver {
        inner: FakeResolver,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl DownloadResolver for FlakyResolver {
        async fn resolve(&self, id: &str) -> Option<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                None
            } else {
                self.inner.resolve(id).await
            }
        }
    }

    #[test]
    fn test_parse_manifest_with_size() {
        let manifest =
            BlobManifest::parse("tgstate-blob\nholiday.mp4\nsize11\n chunk-a \r\nchunk-b\n")
                .unwrap();
        assert_eq!(manifest.filename, "holiday.mp4");
        assert_eq!(manifest.declared_size.as_deref(), Some("11"));
        assert_eq!(manifest.content_length(), Some(11));
        assert_eq!(manifest.chunks, vec!["chunk-a", "chunk-b"]);
    }

    #[test]
    fn test_parse_manifest_without_size() {
        let manifest = BlobManifest::parse("tgstate-blob\narchive.zip\nchunk-a\nchunk-b").unwrap();
        assert_eq!(manifest.declared_size, None);
        assert_eq!(manifest.content_length(), None);
        assert_eq!(manifest.chunks, vec!["chunk-a", "chunk-b"]);
    }

    #[test]
    fn test_parse_manifest_non_numeric_size() {
        let manifest = BlobManifest::parse("tgstate-blob\na.bin\nsize 12 MB\nchunk-a").unwrap();
        assert_eq!(manifest.declared_size.as_deref(), Some("12 MB"));
        assert_eq!(manifest.content_length(), None);
    }

    #[test]
    fn test_parse_manifest_rejects_bad_input() {
        assert!(BlobManifest::parse("").is_err());
        assert!(BlobManifest::parse("not-a-blob\na.bin\nchunk-a").is_err());
        assert!(BlobManifest::parse("tgstate-blob\n\nchunk-a").is_err());
        assert!(BlobManifest::parse("tgstate-blob\na.bin\nsize10\n\n").is_err());
    }

    #[test]
    fn test_retry_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(4), Duration::from_secs(40));
        assert_eq!(policy.delay_after(5), Duration::from_secs(60));
        assert_eq!(policy.delay_after(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stream_concatenates_in_manifest_order() {
        let origin = spawn_origin(vec![
            ("c1", b"first ".to_vec()),
            ("c2", b"second ".to_vec()),
            ("c3", b"third".to_vec()),
        ])
        .await;
        let assembler = BlobAssembler::new(
            Arc::new(FakeResolver { origin: origin.url.clone() }),
            Client::new(),
            fast_retry(),
        );

        let chunks = vec!["c3".to_string(), " c1 ".to_string(), "c2".to_string()];
        let mut output = Vec::new();
        let written = assembler.stream(&chunks, &mut output).await.unwrap();

        assert_eq!(output, b"thirdfirst second ");
        assert_eq!(written, output.len() as u64);
        assert_eq!(origin.downloads(), 3);
    }

    #[tokio::test]
    async fn test_resolution_is_retried() {
        let origin = spawn_origin(vec![("c1", b"data".to_vec())]).await;
        let resolver = FlakyResolver {
            inner: FakeResolver { origin: origin.url.clone() },
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let assembler = BlobAssembler::new(Arc::new(resolver), Client::new(), fast_retry());

        let mut output = Vec::new();
        assembler
            .stream(&["c1".to_string()], &mut output)
            .await
            .unwrap();
        assert_eq!(output, b"data");
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_typed() {
        let origin = spawn_origin(vec![("c1", b"data".to_vec())]).await;
        let assembler = BlobAssembler::new(
            Arc::new(FakeResolver { origin: origin.url.clone() }),
            Client::new(),
            fast_retry(),
        );

        let chunks = vec!["c1".to_string(), "unknown-chunk".to_string()];
        let mut output = Vec::new();
        let err = assembler.stream(&chunks, &mut output).await.unwrap_err();

        match err {
            AssembleError::ChunkUnresolvable { id, attempts } => {
                assert_eq!(id, "unknown-chunk");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        // Bytes already streamed stay streamed
        assert_eq!(output, b"data");
    }

    #[tokio::test]
    async fn test_chunk_download_failure_aborts() {
        let origin = spawn_origin(vec![("c1", b"data".to_vec())]).await;
        let assembler = BlobAssembler::new(
            Arc::new(FakeResolver { origin: origin.url.clone() }),
            Client::new(),
            fast_retry(),
        );

        let chunks = vec!["c1".to_string(), "broken".to_string(), "c1".to_string()];
        let mut output = Vec::new();
        let err = assembler.stream(&chunks, &mut output).await.unwrap_err();

        assert!(matches!(err, AssembleError::ChunkUnavailable { .. }));
        assert_eq!(output, b"data");
        assert_eq!(origin.downloads(), 2);
    }

    #[tokio::test]
    async fn test_fetch_manifest() {
        let origin = spawn_origin(vec![
            ("index", b"tgstate-blob\nmovie.mkv\nsize9\npart1\npart2\n".to_vec()),
            ("plain", b"just a file".to_vec()),
        ])
        .await;
        let assembler = BlobAssembler::new(
            Arc::new(FakeResolver { origin: origin.url.clone() }),
            Client::new(),
            fast_retry(),
        );

        let manifest = assembler.fetch_manifest("index").await.unwrap();
        assert_eq!(manifest.filename, "movie.mkv");
        assert_eq!(manifest.chunks, vec!["part1", "part2"]);

        let err = assembler.fetch_manifest("plain").await.unwrap_err();
        assert!(matches!(err, AssembleError::InvalidManifest(_)));
    }
}
