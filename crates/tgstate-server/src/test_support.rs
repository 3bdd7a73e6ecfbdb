//! Stand-ins for the remote storage service used by handler and assembler tests

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use telegram_file_resolver::DownloadResolver;

/// Resolves every identifier to the test origin except `unknown-*`
pub struct FakeResolver {
    pub origin: String,
}

#[async_trait]
impl DownloadResolver for FakeResolver {
    async fn resolve(&self, id: &str) -> Option<String> {
        if id.starts_with("unknown") {
            None
        } else {
            Some(format!("{}/files/{}", self.origin, id))
        }
    }
}

pub struct Origin {
    pub url: String,
    downloads: Arc<AtomicUsize>,
}

impl Origin {
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

struct OriginState {
    files: HashMap<String, Vec<u8>>,
    downloads: Arc<AtomicUsize>,
}

async fn serve_file(State(state): State<Arc<OriginState>>, Path(name): Path<String>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    match state.files.get(&name) {
        Some(data) => data.clone().into_response(),
        None if name.starts_with("broken") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve `files` under `/files/{name}` on an ephemeral local port
pub async fn spawn_origin(files: Vec<(&str, Vec<u8>)>) -> Origin {
    let downloads = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(OriginState {
        files: files
            .into_iter()
            .map(|(name, data)| (name.to_string(), data))
            .collect(),
        downloads: downloads.clone(),
    });
    let router = Router::new()
        .route("/files/{name}", get(serve_file))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Origin {
        url: format!("http://{}", addr),
        downloads,
    }
}
