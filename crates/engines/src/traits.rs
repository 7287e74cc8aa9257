use ms_domain::config::EngineConfig;
use ms_domain::{Category, Query, Result, SearchResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every upstream search adapter must implement.
///
/// Concrete engines differ only in how `search` talks to the upstream;
/// selection, timeouts, deduplication, and ranking are the aggregator's
/// business. Implementations must abandon I/O promptly when their future is
/// dropped.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// Stable identifier used in config, attribution, and rate limiting.
    fn name(&self) -> &str;

    /// Human-readable name for UIs.
    fn display_name(&self) -> &str;

    /// Categories this engine can serve.
    fn categories(&self) -> &[Category];

    /// Selection order among eligible engines (higher first).
    fn priority(&self) -> i32;

    /// Score multiplier for this engine's contributions.
    fn weight(&self) -> f64;

    fn enabled(&self) -> bool;

    /// Allowed requests per second. Zero or negative disables limiting.
    fn rate_limit(&self) -> f64;

    /// Run one upstream query and return raw, unscored results.
    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>>;

    /// Completion suggestions for a partial query. Engines without a
    /// suggestion endpoint return an empty list.
    async fn suggest(&self, _partial: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Minimal liveness probe. The default issues a one-result search.
    async fn health(&self) -> Result<()> {
        let mut probe = Query::new("ping");
        probe.limit = 1;
        self.search(&probe).await.map(|_| ())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared metadata block
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Config-derived identity fields shared by every adapter. Adapters embed
/// one and forward the trivial getters to it.
#[derive(Debug, Clone)]
pub struct EngineMeta {
    pub name: String,
    pub display_name: String,
    pub categories: Vec<Category>,
    pub priority: i32,
    pub weight: f64,
    pub enabled: bool,
    pub rate_limit: f64,
}

impl EngineMeta {
    pub fn from_config(
        name: &str,
        display_name: &str,
        categories: Vec<Category>,
        cfg: &EngineConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            categories,
            priority: cfg.priority,
            weight: cfg.weight,
            enabled: cfg.enabled,
            rate_limit: cfg.rate_limit,
        }
    }
}
