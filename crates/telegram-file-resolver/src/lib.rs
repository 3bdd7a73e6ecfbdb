//! Telegram file resolver
//!
//! Maps opaque Telegram file identifiers to time-limited direct download URLs
//! through the Bot API `getFile` method. The [`DownloadResolver`] trait is the
//! seam the cache and blob assembler depend on.

pub mod error;
pub mod resolver;
pub mod types;

pub use error::{ResolverError, Result};
pub use resolver::{DownloadResolver, TelegramResolver, DEFAULT_API_BASE};
pub use types::{GetFileResponse, TelegramFile};
