//! Error types for the Telegram file resolver

use std::fmt;

#[derive(Debug)]
pub enum ResolverError {
    Http(Box<reqwest::Error>),
    Api(String),
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverError::Http(err) => write!(f, "HTTP error: {}", err),
            ResolverError::Api(msg) => write!(f, "Bot API error: {}", msg),
        }
    }
}

impl std::error::Error for ResolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolverError::Http(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ResolverError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL embeds the bot token
        ResolverError::Http(Box::new(err.without_url()))
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ResolverError::Api("Bad Request: invalid file_id".to_string());
        assert_eq!(
            format!("{}", err),
            "Bot API error: Bad Request: invalid file_id"
        );
    }

    #[test]
    fn test_error_is_debug() {
        let err = ResolverError::Api("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Api"));
    }
}
