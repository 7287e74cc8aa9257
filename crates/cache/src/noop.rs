//! Null cache backend for `cache.type = "none"`.

use std::time::Duration;

use ms_domain::{Error, Result};

use crate::{Cache, CacheStats};

/// Silently drops writes and misses every read. Lets callers keep an
/// unconditional cache handle when caching is disabled.
pub struct NoopCache;

impl NoopCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Vec<u8>> {
        Err(Error::NotFound)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn clear(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            backend: "none",
            entries: 0,
            memory_bytes: 0,
            hits: 0,
            misses: 0,
            connected: true,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
