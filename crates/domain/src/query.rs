//! The query model accepted by the aggregation core.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Closed vocabularies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Search category. Every query has exactly one; engines advertise the set
/// they can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Images,
    Videos,
    News,
    Music,
    Map,
    It,
    Science,
    Files,
    Social,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::General,
        Category::Images,
        Category::Videos,
        Category::News,
        Category::Music,
        Category::Map,
        Category::It,
        Category::Science,
        Category::Files,
        Category::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Images => "images",
            Category::Videos => "videos",
            Category::News => "news",
            Category::Music => "music",
            Category::Map => "map",
            Category::It => "it",
            Category::Science => "science",
            Category::Files => "files",
            Category::Social => "social",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidQuery(format!("unknown category: {s}")))
    }
}

/// Safe-search filtering level forwarded to engines that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    Off,
    #[default]
    Moderate,
    Strict,
}

impl SafeSearch {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeSearch::Off => "off",
            SafeSearch::Moderate => "moderate",
            SafeSearch::Strict => "strict",
        }
    }
}

/// Recency filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    Any,
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Any => "any",
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single search request as handed to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The raw query text. Must be non-empty after trimming.
    pub text: String,
    #[serde(default)]
    pub category: Category,
    /// 1-based result page.
    #[serde(default = "d_page")]
    pub page: u32,
    /// Results per page.
    #[serde(default = "d_limit")]
    pub limit: u32,
    /// BCP-47 language tag or `"auto"`.
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default)]
    pub safe_search: SafeSearch,
    #[serde(default)]
    pub time_range: TimeRange,
    /// Explicit engine filter. Empty means "all eligible engines".
    #[serde(default)]
    pub engines: Vec<String>,
}

fn d_page() -> u32 {
    1
}
fn d_limit() -> u32 {
    20
}
fn d_language() -> String {
    "auto".into()
}

impl Query {
    /// Build a query with defaults for everything but the text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: Category::default(),
            page: d_page(),
            limit: d_limit(),
            language: d_language(),
            safe_search: SafeSearch::default(),
            time_range: TimeRange::default(),
            engines: Vec::new(),
        }
    }

    /// Validate field ranges against the server-configured maximum limit.
    pub fn validate(&self, max_limit: u32) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if self.page == 0 {
            return Err(Error::InvalidQuery("page must be >= 1".into()));
        }
        if self.limit == 0 || self.limit > max_limit {
            return Err(Error::InvalidQuery(format!(
                "limit must be between 1 and {max_limit}"
            )));
        }
        Ok(())
    }

    /// Canonical form of the query text used for cache keys: trimmed,
    /// lowercased, internal whitespace collapsed to single spaces.
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}
