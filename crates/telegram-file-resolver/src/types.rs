//! Bot API types for file resolution

use serde::Deserialize;

/// Envelope returned by the Bot API `getFile` method
#[derive(Debug, Deserialize)]
pub struct GetFileResponse {
    pub ok: bool,
    pub result: Option<TelegramFile>,
    pub description: Option<String>,
}

/// File metadata; `file_path` is only present while the file is downloadable
#[derive(Debug, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}
