//! Bot API `getFile` resolution

use crate::error::{ResolverError, Result};
use crate::types::GetFileResponse;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// Public Bot API endpoint
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Resolves a file identifier to a direct download URL.
///
/// `None` means the remote service could not produce a URL right now.
#[async_trait]
pub trait DownloadResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Option<String>;
}

/// Resolver backed by the Telegram Bot API
pub struct TelegramResolver {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramResolver {
    /// Create a resolver against the public Bot API
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self::with_api_base(client, token, DEFAULT_API_BASE)
    }

    /// Create a resolver against a self-hosted or proxied Bot API server
    pub fn with_api_base(client: Client, token: impl Into<String>, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn download_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// Resolve a file identifier, keeping the failure reason
    pub async fn try_resolve(&self, id: &str) -> Result<String> {
        let url = format!(
            "{}/bot{}/getFile?file_id={}",
            self.api_base,
            self.token,
            urlencoding::encode(id)
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        // The Bot API reports failures as JSON bodies with a non-2xx status
        let body: GetFileResponse = response.json().await.map_err(|e| {
            if status.is_success() {
                ResolverError::from(e)
            } else {
                ResolverError::Api(format!("getFile returned status {}", status))
            }
        })?;

        if !body.ok {
            return Err(ResolverError::Api(
                body.description
                    .unwrap_or_else(|| format!("getFile returned status {}", status)),
            ));
        }

        let file_path = body
            .result
            .and_then(|file| file.file_path)
            .ok_or_else(|| ResolverError::Api("getFile returned no file_path".to_string()))?;

        Ok(self.download_url(&file_path))
    }
}

#[async_trait]
impl DownloadResolver for TelegramResolver {
    async fn resolve(&self, id: &str) -> Option<String> {
        match self.try_resolve(id).await {
            Ok(url) => {
                debug!(id, "Resolved download URL");
                Some(url)
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to resolve download URL");
                None
            }
        }
    }
}
