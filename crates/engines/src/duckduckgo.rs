//! DuckDuckGo adapter.
//!
//! Uses the keyless instant-answer endpoint for results and the `ac`
//! endpoint for completion suggestions, which also makes this the default
//! suggestion engine.

use ms_domain::config::EngineConfig;
use ms_domain::{Category, Query, Result, SearchResult};
use serde_json::Value;

use crate::traits::{Engine, EngineMeta};
use crate::util::{from_reqwest, from_status, host_of, parse_error};

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";
const SUGGEST_URL: &str = "https://duckduckgo.com/ac/";

pub struct DuckDuckGoEngine {
    meta: EngineMeta,
    base_url: String,
    client: reqwest::Client,
}

impl DuckDuckGoEngine {
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let meta = EngineMeta::from_config(
            "duckduckgo",
            "DuckDuckGo",
            vec![Category::General, Category::It, Category::Science],
            cfg,
        );
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs.unwrap_or(10)))
            .build()
            .map_err(|e| from_reqwest("duckduckgo", e))?;
        Ok(Self {
            meta,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn parse_results(&self, query: &Query, body: &Value) -> Result<Vec<SearchResult>> {
        if !body.is_object() {
            return Err(parse_error(self.name(), "unexpected response shape"));
        }
        let mut out = Vec::new();

        // The abstract, when present, is the best answer.
        let abstract_url = body.get("AbstractURL").and_then(Value::as_str).unwrap_or("");
        if !abstract_url.is_empty() {
            let heading = body.get("Heading").and_then(Value::as_str).unwrap_or("");
            let text = body.get("AbstractText").and_then(Value::as_str).unwrap_or("");
            let mut r = SearchResult::new(self.name(), heading, abstract_url, text, query.category);
            r.domain = host_of(abstract_url);
            out.push(r);
        }

        // Related topics, flattening one level of grouped topics.
        if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
            for topic in topics {
                if let Some(group) = topic.get("Topics").and_then(Value::as_array) {
                    for t in group {
                        if let Some(r) = self.topic_to_result(query, t) {
                            out.push(r);
                        }
                    }
                } else if let Some(r) = self.topic_to_result(query, topic) {
                    out.push(r);
                }
            }
        }

        out.truncate(query.limit as usize);
        Ok(out)
    }

    fn topic_to_result(&self, query: &Query, topic: &Value) -> Option<SearchResult> {
        let url = topic.get("FirstURL").and_then(Value::as_str)?;
        let text = topic.get("Text").and_then(Value::as_str)?;
        // The topic text doubles as title; keep the leading clause.
        let title = text.split(" - ").next().unwrap_or(text);
        let mut r = SearchResult::new(self.name(), title, url, text, query.category);
        r.domain = host_of(url);
        r.thumbnail = topic
            .get("Icon")
            .and_then(|i| i.get("URL"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(r)
    }
}

#[async_trait::async_trait]
impl Engine for DuckDuckGoEngine {
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
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query.text.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("no_redirect", "1"),
            ])
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
        self.parse_results(query, &body)
    }

    async fn suggest(&self, partial: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(SUGGEST_URL)
            .query(&[("q", partial)])
            .send()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(from_status(self.name(), status));
        }

        // The ac endpoint returns `[{"phrase": "..."} ...]`.
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| from_reqwest(self.name(), e))?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("phrase").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
