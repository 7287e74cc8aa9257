//! Configurable in-process engine, used as a test double and for local
//! development without upstream credentials.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ms_domain::{Category, EngineErrorKind, Error, Query, Result, SearchResult};

use crate::traits::{Engine, EngineMeta};

/// An engine that serves canned results, optionally after a delay or with a
/// forced failure. Counts how many searches it received.
pub struct StubEngine {
    meta: EngineMeta,
    results: Vec<SearchResult>,
    suggestions: Vec<String>,
    delay: Option<Duration>,
    fail_with: Option<EngineErrorKind>,
    calls: AtomicUsize,
}

impl StubEngine {
    pub fn new(name: &str) -> Self {
        Self {
            meta: EngineMeta {
                name: name.to_string(),
                display_name: name.to_string(),
                categories: vec![Category::General],
                priority: 0,
                weight: 1.0,
                enabled: true,
                rate_limit: 0.0,
            },
            results: Vec::new(),
            suggestions: Vec::new(),
            delay: None,
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_results(mut self, results: Vec<(&str, &str)>) -> Self {
        self.results = results
            .into_iter()
            .map(|(title, url)| {
                SearchResult::new(&self.meta.name, title, url, format!("about {title}"), Category::General)
            })
            .collect();
        self
    }

    pub fn with_raw_results(mut self, results: Vec<SearchResult>) -> Self {
        self.results = results;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<&str>) -> Self {
        self.suggestions = suggestions.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.meta.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.meta.weight = weight;
        self
    }

    pub fn with_rate_limit(mut self, rate: f64) -> Self {
        self.meta.rate_limit = rate;
        self
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.meta.categories = categories;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.meta.enabled = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_with(mut self, kind: EngineErrorKind) -> Self {
        self.fail_with = Some(kind);
        self
    }

    /// Number of `search` calls that reached this engine.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Engine for StubEngine {
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

    async fn search(&self, _query: &Query) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = self.fail_with {
            return Err(Error::Engine {
                engine: self.meta.name.clone(),
                kind,
                message: "stub failure".into(),
            });
        }
        Ok(self.results.clone())
    }

    async fn suggest(&self, _partial: &str) -> Result<Vec<String>> {
        Ok(self.suggestions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_canned_results_and_counts_calls() {
        let engine = StubEngine::new("stub").with_results(vec![("A", "https://a.example/")]);
        let results = engine.search(&Query::new("q")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].engine, "stub");
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn forced_failure_surfaces_kind() {
        let engine = StubEngine::new("stub").failing_with(EngineErrorKind::Timeout);
        let err = engine.search(&Query::new("q")).await.unwrap_err();
        match err {
            Error::Engine { kind, .. } => assert_eq!(kind, EngineErrorKind::Timeout),
            other => panic!("unexpected error: {other}"),
        }
    }
}
