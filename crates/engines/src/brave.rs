//! Brave Search JSON-API adapter.
//!
//! Talks to the Brave Search API (`/res/v1/{web,news,images,videos}/search`)
//! with a subscription token. One adapter instance serves the web, news,
//! images, and videos categories by switching endpoints.

use ms_domain::config::EngineConfig;
use ms_domain::{Category, Error, Query, Result, SafeSearch, SearchResult, TimeRange};
use serde_json::Value;

use crate::traits::{Engine, EngineMeta};
use crate::util::{from_reqwest, from_status, host_of, parse_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEFAULT_BASE_URL: &str = "https://api.search.brave.com/res/v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BraveEngine {
    meta: EngineMeta,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BraveEngine {
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("brave: api_key is required".into()))?;

        let meta = EngineMeta::from_config(
            "brave",
            "Brave Search",
            vec![
                Category::General,
                Category::News,
                Category::Images,
                Category::Videos,
                Category::It,
                Category::Science,
            ],
            cfg,
        );

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs.unwrap_or(10)))
            .build()
            .map_err(|e| from_reqwest("brave", e))?;

        Ok(Self {
            meta,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self, category: Category) -> &'static str {
        match category {
            Category::News => "news/search",
            Category::Images => "images/search",
            Category::Videos => "videos/search",
            _ => "web/search",
        }
    }

    fn build_params(query: &Query) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.text.clone()),
            ("count", query.limit.to_string()),
            ("offset", (query.page - 1).to_string()),
            (
                "safesearch",
                match query.safe_search {
                    SafeSearch::Off => "off",
                    SafeSearch::Moderate => "moderate",
                    SafeSearch::Strict => "strict",
                }
                .to_string(),
            ),
        ];
        if let Some(freshness) = match query.time_range {
            TimeRange::Any => None,
            TimeRange::Day => Some("pd"),
            TimeRange::Week => Some("pw"),
            TimeRange::Month => Some("pm"),
            TimeRange::Year => Some("py"),
        } {
            params.push(("freshness", freshness.to_string()));
        }
        if query.language != "auto" {
            // Brave expects a bare language code, not a full BCP-47 tag.
            let lang = query.language.split('-').next().unwrap_or(&query.language);
            params.push(("search_lang", lang.to_string()));
        }
        params
    }

    fn parse_results(&self, category: Category, body: &Value) -> Result<Vec<SearchResult>> {
        // Web responses nest under `web.results`; the vertical endpoints
        // return a top-level `results` array.
        let rows = match category {
            Category::News | Category::Images | Category::Videos => body.get("results"),
            _ => body.get("web").and_then(|w| w.get("results")),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| parse_error(self.name(), "missing results array"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let title = row.get("title").and_then(Value::as_str).unwrap_or_default();
            let url = row.get("url").and_then(Value::as_str).unwrap_or_default();
            if title.is_empty() || url.is_empty() {
                continue;
            }
            let content = row
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();

            let mut result = SearchResult::new(self.name(), title, url, content, category);
            result.thumbnail = row
                .get("thumbnail")
                .and_then(|t| t.get("src"))
                .and_then(Value::as_str)
                .map(str::to_string);
            result.domain = host_of(url);
            if let Some(age) = row.get("page_age").and_then(Value::as_str) {
                result.published_at = age.parse().ok();
            }
            out.push(result);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl Engine for BraveEngine {
    fn name(&self) -> &str {
        &self.meta.name
    }
    fn display_name(&self) -> &str {
        &self.meta.display_name
    }
    fn categories(&self) -> &[Category] {
        &self.meta.categories
    }
    fn priority(&self) -> i32 {
        self.meta.priority
    }
    fn weight(&self) -> f64 {
        self.meta.weight
    }
    fn enabled(&self) -> bool {
        self.meta.enabled
    }
    fn rate_limit(&self) -> f64 {
        self.meta.rate_limit
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>> {
        let url = format!("{}/{}", self.base_url, self.endpoint(query.category));
        let response = self
            .client
            .get(&url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&Self::build_params(query))
            .send()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(from_status(self.name(), status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;
        self.parse_results(query.category, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_domain::config::EngineConfig;

    fn engine() -> BraveEngine {
        let mut cfg = EngineConfig::default();
        cfg.api_key = Some("test-token".into());
        BraveEngine::from_config(&cfg).unwrap()
    }

    #[test]
    fn requires_api_key() {
        let cfg = EngineConfig::default();
        assert!(BraveEngine::from_config(&cfg).is_err());
    }

    #[test]
    fn parses_web_results() {
        let body: Value = serde_json::json!({
            "web": { "results": [
                { "title": "Rust", "url": "https://www.rust-lang.org/",
                  "description": "A systems language",
                  "thumbnail": { "src": "https://img/x.png" } },
                { "title": "", "url": "https://skip.me/" }
            ]}
        });
        let results = engine().parse_results(Category::General, &body).unwrap();
        assert_eq!(results.len(), 1, "rows without a title are dropped");
        assert_eq!(results[0].engine, "brave");
        assert_eq!(results[0].domain.as_deref(), Some("rust-lang.org"));
        assert_eq!(results[0].thumbnail.as_deref(), Some("https://img/x.png"));
    }

    #[test]
    fn parses_news_results_from_top_level() {
        let body: Value = serde_json::json!({
            "results": [
                { "title": "Release", "url": "https://blog.rust-lang.org/1.80",
                  "description": "Rust 1.80 is out" }
            ]
        });
        let results = engine().parse_results(Category::News, &body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].category, Category::News);
    }

    #[test]
    fn missing_results_is_parse_error() {
        let body: Value = serde_json::json!({ "unexpected": true });
        let err = engine().parse_results(Category::General, &body).unwrap_err();
        match err {
            Error::Engine { kind, .. } => {
                assert_eq!(kind, ms_domain::EngineErrorKind::Parse)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn time_range_maps_to_freshness() {
        let mut q = Query::new("rust");
        q.time_range = TimeRange::Week;
        let params = BraveEngine::build_params(&q);
        assert!(params.contains(&("freshness", "pw".to_string())));
    }

    #[test]
    fn language_auto_omits_search_lang() {
        let q = Query::new("rust");
        let params = BraveEngine::build_params(&q);
        assert!(params.iter().all(|(k, _)| *k != "search_lang"));
    }
}
