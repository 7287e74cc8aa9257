//! Wire-level response shapes.
//!
//! The HTTP layer serializes [`AggregatedResults`] through these types; they
//! pin the JSON field names the API promises (`description` for the snippet,
//! `search_time_ms`, the pagination block, the `{ok, data}` envelope).

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::{AggregatedResults, SearchResult};

/// One result row as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEntry {
    pub title: String,
    pub url: String,
    pub description: String,
    pub engine: String,
    pub score: f64,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl From<&SearchResult> for ResultEntry {
    fn from(r: &SearchResult) -> Self {
        Self {
            title: r.title.clone(),
            url: r.url.clone(),
            description: r.content.clone(),
            engine: r.engine.clone(),
            score: r.score,
            category: r.category.to_string(),
            thumbnail: r.thumbnail.clone(),
            domain: r.domain.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub pages: u32,
}

/// The search response body handed to the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub category: String,
    pub results: Vec<ResultEntry>,
    pub pagination: Pagination,
    pub search_time_ms: f64,
    pub engines_used: Vec<String>,
}

impl From<&AggregatedResults> for SearchResponse {
    fn from(agg: &AggregatedResults) -> Self {
        let limit = agg.query.limit.max(1);
        let pages = (agg.total_results as u32).div_ceil(limit);
        Self {
            query: agg.query.text.clone(),
            category: agg.query.category.to_string(),
            results: agg.results.iter().map(ResultEntry::from).collect(),
            pagination: Pagination {
                page: agg.query.page,
                limit,
                total: agg.total_results,
                pages,
            },
            search_time_ms: agg.search_time * 1000.0,
            engines_used: agg.engines.clone(),
        }
    }
}

/// Uniform API envelope: `{"ok": true, "data": ...}` or
/// `{"ok": false, "error": "code", "message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn failure(err: &Error) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.code().to_string()),
            message: Some(err.to_string()),
        }
    }
}
