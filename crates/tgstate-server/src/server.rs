//! HTTP server for file delivery
//!
//! Provides /health and /d/{id}. Identifiers starting with `blob-` name a
//! chunk manifest; everything else is served from the local file mirror.

use crate::blob::{BlobAssembler, MANIFEST_PREFIX};
use crate::error::AssembleError;
use crate::sniff::{detect_content_type, SNIFF_LEN};
use crate::types::HealthResponse;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, response::Builder, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use file_mirror_cache::{CacheError, MirrorCache};
use futures::{future, stream, StreamExt};
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Ranges ending this close to the end of a video are treated as end of playback
const VIDEO_TAIL_WINDOW: u64 = 1024 * 1024;
/// Grace period for trailing requests of the same playback session
const VIDEO_INVALIDATION_DELAY: Duration = Duration::from_secs(10);
const FILE_INVALIDATION_DELAY: Duration = Duration::from_secs(5);
const MANIFEST_PIPE_CAPACITY: usize = 64 * 1024;

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<MirrorCache>,
    pub assembler: BlobAssembler,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Arc<MirrorCache>, assembler: BlobAssembler) -> Self {
        Self {
            cache,
            assembler,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/d/", get(not_found))
        .route("/d/{id}", get(get_file))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}

fn internal_error(message: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

fn finish(builder: Builder, body: Body) -> Response {
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Get a file by its remote identifier
async fn get_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if id.is_empty() {
        return not_found().await;
    }

    if let Some(index_id) = id.strip_prefix(MANIFEST_PREFIX) {
        return deliver_manifest(&state, index_id).await;
    }

    let path = match state.cache.get_or_fetch(&id).await {
        Ok(path) => path,
        Err(CacheError::InvalidIdentifier(_)) => return not_found().await,
        Err(e) => {
            error!(id = %id, error = %e, "Failed to fetch file");
            return internal_error("Failed to fetch content");
        }
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match serve_file(&state.cache, &id, &path, range).await {
        Ok(response) => response,
        Err(e) => {
            error!(id = %id, error = %e, "Failed to read cached file");
            internal_error("Failed to read file")
        }
    }
}

/// Stream `reader` and schedule invalidation of `id` once the body is complete
fn body_then_invalidate<R>(reader: R, cache: &Arc<MirrorCache>, id: &str, delay: Duration) -> Body
where
    R: AsyncRead + Send + 'static,
{
    let cache = Arc::clone(cache);
    let id = id.to_string();
    let on_complete = stream::once(async move {
        cache.schedule_invalidation(&id, delay);
        None::<std::io::Result<Bytes>>
    })
    .filter_map(future::ready);

    Body::from_stream(ReaderStream::new(reader).chain(on_complete))
}

/// Serve a cached file, honoring a single byte range for video content
async fn serve_file(
    cache: &Arc<MirrorCache>,
    id: &str,
    path: &std::path::Path,
    range_header: &str,
) -> std::io::Result<Response> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();

    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    file.seek(SeekFrom::Start(0)).await?;

    let content_type = detect_content_type(&head);
    let response = Response::builder().header(header::CONTENT_TYPE, content_type);

    if !content_type.starts_with("video/") {
        let response = response
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .header(header::ACCEPT_RANGES, "none");
        let body = body_then_invalidate(file, cache, id, FILE_INVALIDATION_DELAY);
        return Ok(finish(response, body));
    }

    let response = response.header(header::ACCEPT_RANGES, "bytes");

    let single_range = match http_range_parser::parse(range_header, size) {
        Ok(ranges) if ranges.len() == 1 => Some(ranges[0]),
        Ok(ranges) => {
            if !ranges.is_empty() {
                debug!(id, count = ranges.len(), "Multiple ranges requested, serving whole file");
            }
            None
        }
        Err(e) => {
            debug!(id, error = %e, "Ignoring unusable range header");
            None
        }
    };

    let Some(range) = single_range else {
        let response = response
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size);
        return Ok(finish(response, Body::from_stream(ReaderStream::new(file))));
    };

    file.seek(SeekFrom::Start(range.start)).await?;
    let reader = file.take(range.length());

    let body = if range.end.saturating_add(VIDEO_TAIL_WINDOW) >= size - 1 {
        body_then_invalidate(reader, cache, id, VIDEO_INVALIDATION_DELAY)
    } else {
        Body::from_stream(ReaderStream::new(reader))
    };

    let response = response
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_RANGE, range.content_range(size))
        .header(header::CONTENT_LENGTH, range.length());
    Ok(finish(response, body))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

/// Stream every chunk listed by the manifest `index_id`.
///
/// Range requests are not honored here; the whole file is always sent.
async fn deliver_manifest(state: &ServerState, index_id: &str) -> Response {
    if index_id.is_empty() {
        return not_found().await;
    }

    let manifest = match state.assembler.fetch_manifest(index_id).await {
        Ok(manifest) => manifest,
        Err(AssembleError::InvalidManifest(reason)) => {
            warn!(index_id, reason = %reason, "Requested object is not a blob manifest");
            return (StatusCode::NOT_FOUND, "Not a blob manifest").into_response();
        }
        Err(e) => {
            error!(index_id, error = %e, "Failed to fetch blob manifest");
            return internal_error("Failed to fetch content");
        }
    };

    info!(
        index_id,
        filename = %manifest.filename,
        chunks = manifest.chunks.len(),
        "Streaming blob"
    );

    let (reader, mut writer) = tokio::io::duplex(MANIFEST_PIPE_CAPACITY);
    let assembler = state.assembler.clone();
    let chunks = manifest.chunks.clone();
    let index = index_id.to_string();
    tokio::spawn(async move {
        // Dropping the writer ends the body, truncated if a chunk failed
        match assembler.stream(&chunks, &mut writer).await {
            Ok(written) => debug!(index_id = %index, written, "Blob delivered"),
            Err(e) => error!(index_id = %index, error = %e, "Blob delivery aborted"),
        }
    });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&manifest.filename),
        )
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(length) = manifest.content_length() {
        response = response.header(header::CONTENT_LENGTH, length);
    }

    finish(response, Body::from_stream(ReaderStream::new(reader)))
}
