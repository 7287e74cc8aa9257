//! In-process cache backend.
//!
//! A TTL map guarded by a reader-writer lock, with a background sweeper that
//! drops expired entries and a size cap enforced by evicting the entries
//! closest to expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ms_domain::config::CacheConfig;
use ms_domain::{Error, Result};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{pattern_matches, Cache, CacheStats};

/// Fixed per-entry bookkeeping cost added to the reported memory estimate.
const ENTRY_OVERHEAD: u64 = 16;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process TTL cache.
///
/// Reads take the shared lock; writes and expiry removal take the exclusive
/// lock. A `set` that would grow past `max_size` first evicts the
/// `ceil(max_size / 10)` entries with the earliest `expires_at` — that is
/// the only eviction policy.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    max_size: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    connected: AtomicBool,
    sweeper: CancellationToken,
}

impl MemoryCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = CancellationToken::new();

        let sweep_entries = entries.clone();
        let sweep_token = sweeper.clone();
        let interval = cfg.sweep_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = tick.tick() => {
                        let now = Instant::now();
                        let mut map = sweep_entries.write();
                        let before = map.len();
                        map.retain(|_, e| e.expires_at > now);
                        let removed = before - map.len();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired cache entries");
                        }
                    }
                }
            }
        });

        Self {
            entries,
            max_size: cfg.max_size.max(1),
            default_ttl: cfg.default_ttl(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            sweeper,
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(d) if !d.is_zero() => d,
            _ => self.default_ttl,
        }
    }

    /// Drop the `ceil(max_size/10)` entries closest to expiry.
    fn evict_batch(map: &mut HashMap<String, Entry>, max_size: usize) {
        let batch = max_size.div_ceil(10);
        let mut by_expiry: Vec<(Instant, String)> = map
            .iter()
            .map(|(k, e)| (e.expires_at, k.clone()))
            .collect();
        by_expiry.sort_by_key(|(at, _)| *at);
        for (_, key) in by_expiry.into_iter().take(batch) {
            map.remove(&key);
        }
        tracing::debug!(evicted = batch, "cache at capacity, evicted earliest-expiry batch");
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let now = Instant::now();
        {
            let map = self.entries.read();
            match map.get(key) {
                Some(e) if e.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(e.value.clone());
                }
                Some(_) => {} // expired, remove below
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::NotFound);
                }
            }
        }
        // Expired entry: promote to a write lock to drop it eagerly.
        let mut map = self.entries.write();
        if map.get(key).is_some_and(|e| e.expires_at <= now) {
            map.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Err(Error::NotFound)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = Instant::now() + self.effective_ttl(ttl);
        let mut map = self.entries.write();
        if !map.contains_key(key) && map.len() >= self.max_size {
            Self::evict_batch(&mut map, self.max_size);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let map = self.entries.read();
        Ok(map.get(key).is_some_and(|e| e.expires_at > Instant::now()))
    }

    async fn clear(&self, pattern: &str) -> Result<()> {
        let mut map = self.entries.write();
        map.retain(|k, _| !pattern_matches(pattern, k));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let map = self.entries.read();
        let memory_bytes = map
            .values()
            .map(|e| e.value.len() as u64 + ENTRY_OVERHEAD)
            .sum();
        Ok(CacheStats {
            backend: "memory",
            entries: map.len() as u64,
            memory_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        })
    }

    async fn close(&self) -> Result<()> {
        self.sweeper.cancel();
        self.connected.store(false, Ordering::Relaxed);
        self.entries.write().clear();
        Ok(())
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_size: usize) -> MemoryCache {
        let mut cfg = CacheConfig::default();
        cfg.max_size = max_size;
        cfg.ttl_secs = 300;
        MemoryCache::new(&cfg)
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = small_cache(100);
        cache.set("k", b"v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), b"v");
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn get_after_ttl_elapses_is_not_found() {
        let cache = small_cache(100);
        cache
            .set("k", b"v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(cache.get("k").await.is_ok());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("k").await.unwrap_err().is_not_found());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn zero_ttl_uses_default() {
        let cache = small_cache(100);
        cache
            .set("k", b"v", Some(Duration::ZERO))
            .await
            .unwrap();
        // Default TTL is 300s, so the entry is still live.
        assert!(cache.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn eviction_removes_earliest_expiry_batch() {
        let cache = small_cache(10);
        // Entries k0..k9 with strictly increasing TTLs.
        for i in 0..10u64 {
            cache
                .set(
                    &format!("k{i}"),
                    b"v",
                    Some(Duration::from_secs(10 + i)),
                )
                .await
                .unwrap();
        }
        // Next insert evicts ceil(10/10) = 1 entry: k0, the earliest expiry.
        cache
            .set("k10", b"v", Some(Duration::from_secs(100)))
            .await
            .unwrap();
        assert!(!cache.exists("k0").await.unwrap(), "earliest expiry evicted");
        for i in 1..=10u64 {
            assert!(
                cache.exists(&format!("k{i}")).await.unwrap(),
                "k{i} kept: its expiry is later than the evicted entry's"
            );
        }
    }

    #[tokio::test]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = small_cache(2);
        cache.set("a", b"1", None).await.unwrap();
        cache.set("b", b"2", None).await.unwrap();
        cache.set("a", b"3", None).await.unwrap();
        assert!(cache.exists("a").await.unwrap());
        assert!(cache.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn clear_with_prefix_pattern() {
        let cache = small_cache(100);
        cache.set("search:1", b"a", None).await.unwrap();
        cache.set("search:2", b"b", None).await.unwrap();
        cache.set("other:1", b"c", None).await.unwrap();
        cache.clear("search:*").await.unwrap();
        assert!(!cache.exists("search:1").await.unwrap());
        assert!(!cache.exists("search:2").await.unwrap());
        assert!(cache.exists("other:1").await.unwrap());
    }

    #[tokio::test]
    async fn clear_without_wildcard_is_a_noop() {
        let cache = small_cache(100);
        cache.set("search:1", b"a", None).await.unwrap();
        cache.clear("search:1").await.unwrap();
        assert!(cache.exists("search:1").await.unwrap());
    }

    #[tokio::test]
    async fn stats_track_hits_misses_and_size() {
        let cache = small_cache(100);
        cache.set("k", b"value", None).await.unwrap();
        let _ = cache.get("k").await;
        let _ = cache.get("k").await;
        let _ = cache.get("missing").await;
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.memory_bytes, 5 + ENTRY_OVERHEAD);
        assert!(stats.connected);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn close_disconnects_and_clears() {
        let cache = small_cache(100);
        cache.set("k", b"v", None).await.unwrap();
        cache.close().await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert!(!stats.connected);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let mut cfg = CacheConfig::default();
        cfg.sweep_interval_secs = 1;
        let cache = MemoryCache::new(&cfg);
        cache
            .set("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        // Entry removed by the sweeper, not just hidden by the read path.
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }
}
