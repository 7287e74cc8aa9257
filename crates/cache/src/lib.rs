//! Cache abstraction.
//!
//! A uniform byte-oriented key/value interface with interchangeable
//! backends: an in-process map with TTL ([`memory::MemoryCache`]), a remote
//! Redis-protocol server ([`redis_backend::RedisCache`]), and a no-op
//! backend that drops everything ([`noop::NoopCache`]). The aggregator uses
//! it as a hot-path response cache; the scheduler as an auxiliary store.

use std::sync::Arc;
use std::time::Duration;

use ms_domain::config::CacheConfig;
use ms_domain::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod memory;
pub mod noop;
pub mod redis_backend;

pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use redis_backend::RedisCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time counters and identity for one cache backend.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub entries: u64,
    /// Approximate: sum of value lengths plus a small per-entry overhead.
    pub memory_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub connected: bool,
}

/// Uniform cache contract implemented by every backend.
///
/// `get` returns [`Error::NotFound`] on a miss; transport and protocol
/// problems surface as [`Error::Backend`] so callers can tell the two apart.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Store a value. `None` or a zero `ttl` means "use the default TTL".
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove every key matching `pattern` (see [`pattern_matches`]).
    async fn clear(&self, pattern: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    async fn stats(&self) -> Result<CacheStats>;

    async fn close(&self) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern language
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Matching rules for [`Cache::clear`]:
///
/// - `*` matches every key,
/// - `prefix*` matches keys starting with `prefix`,
/// - `*suffix` matches keys ending with `suffix`,
/// - a pattern without a wildcard matches nothing. `clear` is a bulk
///   operation; single-key removal goes through `delete`.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.contains('*') {
            return key.starts_with(prefix);
        }
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if !suffix.contains('*') {
            return key.ends_with(suffix);
        }
    }
    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construct the backend selected by `cache.type`.
///
/// `memory`, `redis`, `valkey` (Redis-protocol compatible), and `none` are
/// recognized. Anything else falls back to the in-process backend with a
/// warning. Remote construction fails if the initial ping does.
pub async fn from_config(cfg: &CacheConfig) -> Result<Arc<dyn Cache>> {
    match cfg.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCache::new(cfg))),
        "redis" | "valkey" => {
            let cache = RedisCache::connect(cfg).await?;
            Ok(Arc::new(cache))
        }
        "none" => Ok(Arc::new(NoopCache::new())),
        other => {
            tracing::warn!(backend = %other, "unknown cache backend, falling back to memory");
            Ok(Arc::new(MemoryCache::new(cfg)))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fetch and deserialize a JSON value. Misses stay [`Error::NotFound`];
/// malformed payloads surface as [`Error::Encoding`].
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<T> {
    let bytes = cache.get(key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serialize and store a JSON value.
pub async fn set_json<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    cache.set(key, &bytes, ttl).await
}
