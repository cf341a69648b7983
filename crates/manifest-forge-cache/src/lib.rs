//! Byte-blob cache shared by every tier of the source-acquisition pipeline.
//!
//! Keys are deterministic joins of semantic fields (callers canonicalize
//! before key construction); values are opaque bytes. A failed `set` is a
//! warning for callers, never a reason to drop a freshly computed value.

mod memory;
mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid cache url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Contract shared by all backends.
///
/// Concurrent `get`/`set` on the same key are safe; concurrent misses may
/// independently recompute and the last writer wins. Values are stored
/// atomically, so observers never see torn bytes.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// `Ok(None)` is a miss. An `Err` is a backend failure, not a miss.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Every currently live key, in no particular order.
    async fn keys(&self) -> CacheResult<Vec<String>>;
}
