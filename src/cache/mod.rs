//! Response cache: write-through interception and degraded-mode fallback reads.
//!
//! Two components share one [`CacheBackend`] and one [`CacheConfig`]:
//!
//! - [`ResponseCacheMiddleware`] sits in the middleware chain. It observes
//!   every `GET` response, passes the body through untouched and, once the
//!   whole body has gone by, stores it under the request path with a fixed TTL.
//!   The write runs on a detached task; its outcome is only logged.
//! - [`FallbackReader`] serves `GET {fallback_prefix}{path}`. It strips the
//!   prefix, reads the entry the middleware stored for `path`, and answers
//!   with a JSON envelope: `{"cache": ...}`, or an `{"error": ...}` for a
//!   miss, a corrupt entry, or an unreachable backend.
//!
//! The two never call each other; they agree only on [`key`] derivation.
//!
//! ## Backends
//!
//! - [`MemoryBackend`]: in-process moka cache with per-entry TTL.
//! - `RedisBackend`: `SET key value EX ttl` / `GET key` (feature `redis`).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod fallback;
pub mod interceptor;
pub mod key;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use config::{CacheConfig, QueryKeyMode};
pub use fallback::{FallbackOutcome, FallbackReader};
pub use interceptor::ResponseCacheMiddleware;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Errors reported by a [`CacheBackend`].
///
/// None of these ever reach a client of the cached route: write failures are
/// logged and dropped, read failures become [`FallbackOutcome::BackendError`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A string key-value store with per-write expiry.
///
/// This is the whole contract the cache components need. Implementations
/// must be safe to call concurrently from many requests; a single `set` is
/// assumed atomic per key, and when two writes to one key overlap the last to
/// complete wins.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value, expiring
    /// after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
}

// Bounds a backend call so neither component can hang on a stalled store.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    op: impl Future<Output = CacheResult<T>>,
) -> CacheResult<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| CacheError::Timeout(limit))?
}
