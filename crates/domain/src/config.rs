//! Configuration tree consumed by the core.
//!
//! Loading (files, env, flags) is the outer layer's job; the core only reads
//! an already-deserialized [`Config`] value. Reloads reconstruct dependent
//! components through their factories instead of mutating these structs in
//! place.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Per-engine settings (key = engine name).
    #[serde(default)]
    pub engines: HashMap<String, EngineConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server / request handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Overall deadline for one aggregated search.
    #[serde(default = "d_30")]
    pub request_timeout_secs: u64,
    /// Deadline for each individual engine call.
    #[serde(default = "d_10")]
    pub per_engine_timeout_secs: u64,
    #[serde(default = "d_5")]
    pub suggest_timeout_secs: u64,
    #[serde(default = "d_5")]
    pub health_timeout_secs: u64,
    /// Upper bound accepted for `Query.limit`.
    #[serde(default = "d_50")]
    pub max_limit: u32,
    /// Cap on engines queried per request. 0 means no cap.
    #[serde(default)]
    pub max_engines: usize,
    /// TTL for cached search responses.
    #[serde(default = "d_300")]
    pub result_cache_ttl_secs: u64,
    /// Engine that serves completion suggestions.
    #[serde(default = "d_suggest_engine")]
    pub suggest_engine: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            per_engine_timeout_secs: 10,
            suggest_timeout_secs: 5,
            health_timeout_secs: 5,
            max_limit: 50,
            max_engines: 0,
            result_cache_ttl_secs: 300,
            suggest_engine: d_suggest_engine(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
    pub fn per_engine_timeout(&self) -> Duration {
        Duration::from_secs(self.per_engine_timeout_secs)
    }
    pub fn suggest_timeout(&self) -> Duration {
        Duration::from_secs(self.suggest_timeout_secs)
    }
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `memory` | `redis` | `valkey` | `none`. Unknown values fall back to
    /// memory with a warning.
    #[serde(default = "d_memory", rename = "type")]
    pub backend: String,
    /// Max entry count for the in-process backend.
    #[serde(default = "d_10000")]
    pub max_size: usize,
    /// Default TTL applied when `set` is called without one.
    #[serde(default = "d_300")]
    pub ttl_secs: u64,
    /// Key namespace for the remote backend. The in-process backend does not
    /// prefix.
    #[serde(default = "d_prefix")]
    pub prefix: String,
    /// Full connection URL. Takes precedence over host/port when set.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "d_localhost")]
    pub host: String,
    #[serde(default = "d_6379")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "d_8")]
    pub pool_size: u32,
    #[serde(default = "d_1_u32")]
    pub min_idle: u32,
    /// Sweep interval for the in-process expiry janitor.
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: d_memory(),
            max_size: 10_000,
            ttl_secs: 300,
            prefix: d_prefix(),
            url: None,
            host: d_localhost(),
            port: 6379,
            password: None,
            db: 0,
            pool_size: 8,
            min_idle: 1,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Connection URL for the remote backend, built from parts when no full
    /// URL was configured.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone name all cron expressions are evaluated in.
    #[serde(default = "d_utc")]
    pub timezone: String,
    /// Missed global triggers older than this are skipped at startup.
    #[serde(default = "d_3600")]
    pub catch_up_window_secs: u64,
    /// TTL on the per-task cluster lease.
    #[serde(default = "d_300")]
    pub lock_ttl_secs: u64,
    /// Per-execution timeout.
    #[serde(default = "d_1800")]
    pub task_timeout_secs: u64,
    /// How long `stop()` waits for running tasks before cancelling them.
    #[serde(default = "d_30")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "d_1")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: d_utc(),
            catch_up_window_secs: 3600,
            lock_ttl_secs: 300,
            task_timeout_secs: 1800,
            shutdown_timeout_secs: 30,
            tick_secs: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn catch_up_window(&self) -> Duration {
        Duration::from_secs(self.catch_up_window_secs)
    }
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-engine settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Selection order among eligible engines (higher first).
    #[serde(default)]
    pub priority: i32,
    /// Score multiplier applied to this engine's contributions.
    #[serde(default = "d_weight")]
    pub weight: f64,
    /// Requests per second. 0 disables rate limiting for this engine.
    #[serde(default)]
    pub rate_limit: f64,
    /// Per-call timeout override. Falls back to `server.per_engine_timeout`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            weight: 1.0,
            rate_limit: 0.0,
            timeout_secs: None,
            api_key: None,
            base_url: None,
        }
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_1() -> u64 {
    1
}
fn d_5() -> u64 {
    5
}
fn d_10() -> u64 {
    10
}
fn d_30() -> u64 {
    30
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_1800() -> u64 {
    1800
}
fn d_3600() -> u64 {
    3600
}
fn d_50() -> u32 {
    50
}
fn d_6379() -> u16 {
    6379
}
fn d_8() -> u32 {
    8
}
fn d_1_u32() -> u32 {
    1
}
fn d_10000() -> usize {
    10_000
}
fn d_true() -> bool {
    true
}
fn d_weight() -> f64 {
    1.0
}
fn d_memory() -> String {
    "memory".into()
}
fn d_prefix() -> String {
    "apimgr:".into()
}
fn d_localhost() -> String {
    "localhost".into()
}
fn d_utc() -> String {
    "UTC".into()
}
fn d_suggest_engine() -> String {
    "duckduckgo".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_spec_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert_eq!(cfg.server.per_engine_timeout_secs, 10);
        assert_eq!(cfg.cache.backend, "memory");
        assert_eq!(cfg.cache.prefix, "apimgr:");
        assert_eq!(cfg.scheduler.lock_ttl_secs, 300);
        assert_eq!(cfg.scheduler.catch_up_window_secs, 3600);
        assert_eq!(cfg.scheduler.timezone, "UTC");
    }

    #[test]
    fn connection_url_prefers_explicit_url() {
        let mut cfg = CacheConfig::default();
        cfg.url = Some("redis://example:7000/2".into());
        assert_eq!(cfg.connection_url(), "redis://example:7000/2");
    }

    #[test]
    fn connection_url_builds_from_parts() {
        let mut cfg = CacheConfig::default();
        cfg.password = Some("hunter2".into());
        cfg.db = 3;
        assert_eq!(cfg.connection_url(), "redis://:hunter2@localhost:6379/3");
    }

    #[test]
    fn engine_config_defaults() {
        let ec: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(ec.enabled);
        assert_eq!(ec.weight, 1.0);
        assert_eq!(ec.rate_limit, 0.0);
    }
}
