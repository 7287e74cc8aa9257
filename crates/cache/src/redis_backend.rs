//! Remote cache backend speaking the Redis protocol (Redis or Valkey).
//!
//! Every key is namespaced with the configured prefix before it goes on the
//! wire. Construction pings the server and fails fast when it is
//! unreachable. Beyond the uniform [`Cache`] contract this backend exposes
//! the primitives distributed callers want: `SET NX`, `INCR`, `EXPIRE`,
//! hash-field operations, and pub/sub publishing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ms_domain::config::CacheConfig;
use ms_domain::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{Cache, CacheStats};

pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    connected: AtomicBool,
}

fn backend_err(e: redis::RedisError) -> Error {
    Error::Backend(e.to_string())
}

impl RedisCache {
    /// Connect and verify the server responds to PING.
    pub async fn connect(cfg: &CacheConfig) -> Result<Self> {
        let url = cfg.connection_url();
        let client = redis::Client::open(url.as_str()).map_err(backend_err)?;
        let mut conn = ConnectionManager::new(client).await.map_err(backend_err)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        tracing::info!(host = %cfg.host, port = cfg.port, prefix = %cfg.prefix, "connected to redis cache");

        Ok(Self {
            conn,
            prefix: cfg.prefix.clone(),
            default_ttl: cfg.default_ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(d) if !d.is_zero() => d,
            _ => self.default_ttl,
        }
    }

    // ── Extras beyond the uniform contract ─────────────────────────

    /// `SET key value NX EX ttl` — returns `true` when the key was created.
    /// Usable as a cheap distributed single-flight latch.
    pub async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let full = self.namespaced(key);
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(&full, value).await.map_err(backend_err)?;
        if created {
            let secs = self.effective_ttl(ttl).as_secs() as i64;
            let _: bool = conn.expire(&full, secs).await.map_err(backend_err)?;
        }
        Ok(created)
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr(self.namespaced(key), delta)
            .await
            .map_err(backend_err)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.expire(self.namespaced(key), ttl.as_secs() as i64)
            .await
            .map_err(backend_err)
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(self.namespaced(key), field, value)
            .await
            .map_err(backend_err)
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Vec<u8>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .hget(self.namespaced(key), field)
            .await
            .map_err(backend_err)?;
        value.ok_or(Error::NotFound)
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn.clone();
        conn.hgetall(self.namespaced(key)).await.map_err(backend_err)
    }

    /// Publish a message on a namespaced channel.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(self.namespaced(channel), payload)
            .await
            .map_err(backend_err)
    }

    /// Server-side cursor scan for namespaced keys matching a glob.
    async fn scan_keys(&self, glob: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(glob)
            .await
            .map_err(backend_err)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .await
            .map_err(backend_err)?;
        match value {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(Error::NotFound)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = self.effective_ttl(ttl).as_secs();
        conn.set_ex::<_, _, ()>(self.namespaced(key), value, secs)
            .await
            .map_err(backend_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.namespaced(key))
            .await
            .map_err(backend_err)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.namespaced(key)).await.map_err(backend_err)
    }

    async fn clear(&self, pattern: &str) -> Result<()> {
        // The shared pattern language: no wildcard means no matches.
        if !pattern.contains('*') {
            return Ok(());
        }
        let glob = format!("{}{}", self.prefix, pattern);
        let keys = self.scan_keys(&glob).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await.map_err(backend_err)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let glob = format!("{}*", self.prefix);
        let entries = self.scan_keys(&glob).await?.len() as u64;
        Ok(CacheStats {
            backend: "redis",
            entries,
            memory_bytes: 0,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        })
    }

    async fn close(&self) -> Result<()> {
        // ConnectionManager has no explicit shutdown; dropping the last clone
        // closes the multiplexed connection.
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}
