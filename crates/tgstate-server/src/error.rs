//! Error types for the tgstate file server

use std::fmt;

#[derive(Debug)]
pub enum ServerError {
    Cache(file_mirror_cache::CacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Cache(err) => write!(f, "Cache error: {}", err),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Cache(err) => Some(err),
            ServerError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<file_mirror_cache::CacheError> for ServerError {
    fn from(err: file_mirror_cache::CacheError) -> Self {
        ServerError::Cache(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Failures while reassembling a chunked file
#[derive(Debug)]
pub enum AssembleError {
    /// The resolver kept failing until the retry policy gave up
    ChunkUnresolvable { id: String, attempts: u32 },
    /// A resolved object could not be downloaded
    ChunkUnavailable { id: String, reason: String },
    InvalidManifest(String),
    /// Writing to the output failed, usually because the client went away
    Output(Box<std::io::Error>),
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::ChunkUnresolvable { id, attempts } => {
                write!(f, "Chunk {} still unresolved after {} attempts", id, attempts)
            }
            AssembleError::ChunkUnavailable { id, reason } => {
                write!(f, "Chunk {} unavailable: {}", id, reason)
            }
            AssembleError::InvalidManifest(msg) => write!(f, "Invalid blob manifest: {}", msg),
            AssembleError::Output(err) => write!(f, "Output error: {}", err),
        }
    }
}

impl std::error::Error for AssembleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssembleError::Output(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AssembleError {
    fn from(err: std::io::Error) -> Self {
        AssembleError::Output(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = ServerError::Cache(file_mirror_cache::CacheError::ResolveFailed(
            "BQACAgUA".to_string(),
        ));
        assert!(format!("{}", err).contains("BQACAgUA"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("BOT_TOKEN is not set".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: BOT_TOKEN is not set"
        );
    }

    #[test]
    fn test_chunk_unresolvable_display() {
        let err = AssembleError::ChunkUnresolvable {
            id: "part-3".to_string(),
            attempts: 6,
        };
        assert_eq!(
            format!("{}", err),
            "Chunk part-3 still unresolved after 6 attempts"
        );
    }

    #[test]
    fn test_error_is_debug() {
        let err = AssembleError::InvalidManifest("missing marker".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("InvalidManifest"));
    }
}
