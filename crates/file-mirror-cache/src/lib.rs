//! On-disk mirror of remotely hosted files
//!
//! Files are downloaded on first access, tracked by last access time, and
//! evicted by a periodic sweep once idle past a TTL. Callers may also schedule
//! a deferred invalidation, which a later access of the same file cancels.

mod cache;
mod error;
mod invalidation;
mod types;

pub use cache::MirrorCache;
pub use error::{CacheError, Result};
pub use types::{CacheConfig, CacheEntry, CacheStats};
