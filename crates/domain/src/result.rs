//! Result types produced by engines and by the aggregation core.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineErrorKind;
use crate::query::{Category, Query};

/// One search hit. Engines produce these; the aggregator merges duplicates
/// and assigns the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Absolute URL.
    pub url: String,
    /// Snippet text.
    pub content: String,
    /// The engine that first contributed this result.
    pub engine: String,
    /// All engines that contributed after merging. Always non-empty.
    #[serde(default)]
    pub engines: Vec<String>,
    /// Fused relevance score, assigned by the aggregator.
    #[serde(default)]
    pub score: f64,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Engine-specific extras, carried through opaquely.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    /// A minimal result attributed to one engine.
    pub fn new(
        engine: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        category: Category,
    ) -> Self {
        let engine = engine.into();
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
            engines: vec![engine.clone()],
            engine,
            score: 0.0,
            category,
            thumbnail: None,
            domain: None,
            published_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// Per-engine failure record. Collected by the aggregator; never fails the
/// request on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineFailure {
    pub engine: String,
    pub kind: EngineErrorKind,
    pub message: String,
}

/// The merged, ranked output of one aggregated search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub query: Query,
    /// Ordered by descending score.
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    /// Wall-clock duration of the fan-out, in seconds.
    pub search_time: f64,
    /// Engines that returned at least one result.
    pub engines: Vec<String>,
    /// Per-engine failures, for debug surfaces only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EngineFailure>,
    /// Set when the response was served from the result cache.
    #[serde(default)]
    pub from_cache: bool,
}
