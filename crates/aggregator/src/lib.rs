//! Search aggregation core.
//!
//! Turns one [`Query`] into a merged, ranked answer: select eligible
//! engines, fan out in parallel under per-engine and aggregate deadlines,
//! collect partial failures without failing the request, dedupe by URL
//! fingerprint, fuse ranks, and optionally serve/populate the response
//! cache with single-flight coalescing on identical misses.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use ms_cache::Cache;
use ms_domain::config::{Config, ServerConfig};
use ms_domain::{
    AggregatedResults, EngineErrorKind, EngineFailure, Error, Query, Result, SearchResult,
};
use ms_engines::{Engine, EngineRegistry};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

pub mod dedupe;
pub mod rank;
pub mod ratelimit;
pub mod singleflight;

use ratelimit::RateLimiterMap;
use singleflight::{await_outcome, Flight, SingleFlight};

type SharedOutcome = Arc<Result<AggregatedResults>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The search front door. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Aggregator {
    registry: Arc<EngineRegistry>,
    cache: Option<Arc<dyn Cache>>,
    server: Arc<ServerConfig>,
    limiter: Arc<RateLimiterMap>,
    flights: Arc<SingleFlight<SharedOutcome>>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<EngineRegistry>,
        cache: Option<Arc<dyn Cache>>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            cache,
            server: Arc::new(config.server.clone()),
            limiter: Arc::new(RateLimiterMap::new()),
            flights: Arc::new(SingleFlight::new()),
        }
    }

    // ── Public contract ────────────────────────────────────────────

    /// Run one aggregated search. Synchronous for the caller, parallel
    /// inside. Dropping the returned future cancels all in-flight engine
    /// calls (unless a coalesced flight has waiters, which keep the shared
    /// fan-out alive).
    pub async fn search(&self, query: Query) -> Result<AggregatedResults> {
        query.validate(self.server.max_limit)?;

        let cache_key = self.cacheable(&query).then(|| cache_key(&query));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            match ms_cache::get_json::<AggregatedResults>(cache.as_ref(), key).await {
                Ok(mut hit) => {
                    hit.from_cache = true;
                    tracing::debug!(key = %key, "serving search from cache");
                    return Ok(hit);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    // A broken cache degrades to a plain fan-out.
                    tracing::warn!(error = %e, "cache read failed, bypassing");
                }
            }
        }

        match cache_key {
            Some(key) => self.coalesced_search(query, key).await,
            None => self.fan_out(query).await,
        }
    }

    /// Completion suggestions from the configured suggestion engine.
    /// Never fails: timeouts and upstream errors yield an empty list.
    pub async fn suggest(&self, partial: &str) -> Vec<String> {
        if partial.trim().is_empty() {
            return Vec::new();
        }
        let Some(engine) = self.registry.get(&self.server.suggest_engine) else {
            return Vec::new();
        };
        match tokio::time::timeout(self.server.suggest_timeout(), engine.suggest(partial)).await {
            Ok(Ok(suggestions)) => suggestions,
            Ok(Err(e)) => {
                tracing::debug!(engine = %engine.name(), error = %e, "suggest failed");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(engine = %engine.name(), "suggest timed out");
                Vec::new()
            }
        }
    }

    /// Probe every enabled engine in parallel. Values are `"ok"` or the
    /// error string.
    pub async fn health_check(&self) -> HashMap<String, String> {
        let timeout = self.server.health_timeout();
        let mut probes = JoinSet::new();
        for engine in self.registry.iter() {
            if !engine.enabled() {
                continue;
            }
            let engine = engine.clone();
            probes.spawn(async move {
                let status = match tokio::time::timeout(timeout, engine.health()).await {
                    Ok(Ok(())) => "ok".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "health probe timed out".to_string(),
                };
                (engine.name().to_string(), status)
            });
        }

        let mut out = HashMap::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((name, status)) = joined {
                out.insert(name, status);
            }
        }
        out
    }

    // ── Engine selection ───────────────────────────────────────────

    fn select_engines(&self, query: &Query) -> Result<Vec<Arc<dyn Engine>>> {
        let explicit: HashSet<&str> = query.engines.iter().map(String::as_str).collect();

        let mut candidates: Vec<Arc<dyn Engine>> = self
            .registry
            .iter()
            .filter(|e| {
                e.enabled()
                    && e.categories().contains(&query.category)
                    && (explicit.is_empty() || explicit.contains(e.name()))
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });

        if self.server.max_engines > 0 {
            candidates.truncate(self.server.max_engines);
        }

        if candidates.is_empty() {
            return Err(Error::NoEnginesAvailable);
        }
        Ok(candidates)
    }

    // ── Caching & coalescing ───────────────────────────────────────

    /// Only vanilla first-page queries are cached: an explicit engine
    /// override or a non-default safe-search level would poison shared
    /// entries.
    fn cacheable(&self, query: &Query) -> bool {
        self.cache.is_some()
            && query.engines.is_empty()
            && query.safe_search == Default::default()
            && query.page == 1
    }

    async fn coalesced_search(&self, query: Query, key: String) -> Result<AggregatedResults> {
        let rx = match self.flights.join(&key) {
            Flight::Leader(handle, rx) => {
                // Detached: waiters (and the leader's own caller going away)
                // must not cancel the shared fan-out.
                let this = self.clone();
                let leader_query = query.clone();
                let leader_key = key.clone();
                tokio::spawn(async move {
                    let outcome = this.fan_out(leader_query).await;
                    if let (Some(cache), Ok(agg)) = (&this.cache, &outcome) {
                        if let Err(e) = ms_cache::set_json(
                            cache.as_ref(),
                            &leader_key,
                            agg,
                            Some(this.server.result_cache_ttl()),
                        )
                        .await
                        {
                            tracing::warn!(error = %e, "failed to write search response to cache");
                        }
                    }
                    handle.resolve(Arc::new(outcome));
                });
                rx
            }
            Flight::Waiter(rx) => rx,
        };

        match await_outcome(rx).await {
            Some(outcome) => match outcome.as_ref() {
                Ok(agg) => Ok(agg.clone()),
                Err(e) => Err(clone_outcome_error(e)),
            },
            // Leader abandoned (spawn panicked); run the query directly.
            None => self.fan_out(query).await,
        }
    }

    // ── Fan-out ────────────────────────────────────────────────────

    async fn fan_out(&self, query: Query) -> Result<AggregatedResults> {
        let started = Instant::now();
        let selected = self.select_engines(&query)?;
        let per_engine_timeout = self.server.per_engine_timeout();

        let mut failures: Vec<EngineFailure> = Vec::new();
        let mut outstanding: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();

        for engine in selected {
            if !self.limiter.try_acquire(engine.name(), engine.rate_limit()) {
                tracing::debug!(engine = %engine.name(), "rate limit exhausted, skipping engine");
                failures.push(EngineFailure {
                    engine: engine.name().to_string(),
                    kind: EngineErrorKind::RateLimited,
                    message: "rate limit exhausted".into(),
                });
                continue;
            }

            outstanding.insert(engine.name().to_string());
            let q = query.clone();
            tasks.spawn(async move {
                let name = engine.name().to_string();
                let weight = engine.weight();
                let outcome = match tokio::time::timeout(per_engine_timeout, engine.search(&q)).await
                {
                    Ok(Ok(results)) => Ok(results),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::Engine {
                        engine: name.clone(),
                        kind: EngineErrorKind::Timeout,
                        message: format!("no response within {per_engine_timeout:?}"),
                    }),
                };
                (name, weight, outcome)
            });
        }

        let mut per_engine: Vec<(String, f64, Vec<SearchResult>)> = Vec::new();
        let deadline = tokio::time::sleep(self.server.request_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((name, weight, Ok(results))) => {
                            outstanding.remove(&name);
                            if results.is_empty() {
                                tracing::debug!(engine = %name, "engine returned no results");
                            } else {
                                tracing::debug!(engine = %name, count = results.len(), "engine returned results");
                                per_engine.push((name, weight, results));
                            }
                        }
                        Ok((name, _, Err(e))) => {
                            outstanding.remove(&name);
                            tracing::debug!(engine = %name, error = %e, "engine failed");
                            failures.push(engine_failure(&name, e));
                        }
                        Err(join_err) => {
                            tracing::warn!(error = %join_err, "engine task aborted unexpectedly");
                        }
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        outstanding = outstanding.len(),
                        "aggregate deadline reached, cancelling remaining engines"
                    );
                    tasks.abort_all();
                    for name in outstanding.drain() {
                        failures.push(EngineFailure {
                            engine: name,
                            kind: EngineErrorKind::Timeout,
                            message: "cancelled at aggregate deadline".into(),
                        });
                    }
                    break;
                }
            }
        }

        let hard_failures = failures
            .iter()
            .filter(|f| f.kind != EngineErrorKind::RateLimited)
            .count();

        if per_engine.is_empty() {
            return if hard_failures > 0 {
                Err(Error::AllEnginesFailed)
            } else {
                Err(Error::NoResults)
            };
        }

        let merged = dedupe::merge(&per_engine);
        let (results, total_results) = rank::rank_and_paginate(merged, &query);

        let mut engines: Vec<String> = per_engine.into_iter().map(|(name, ..)| name).collect();
        engines.sort();

        let search_time = started.elapsed().as_secs_f64();
        tracing::info!(
            query = %query.text,
            category = %query.category,
            results = total_results,
            engines = engines.len(),
            failed = failures.len(),
            elapsed_ms = (search_time * 1000.0) as u64,
            "search aggregated"
        );

        Ok(AggregatedResults {
            query,
            results,
            total_results,
            search_time,
            engines,
            errors: failures,
            from_cache: false,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cache key for a cacheable query: truncated digest over every field that
/// changes the answer.
pub fn cache_key(query: &Query) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}",
        query.category,
        query.language,
        query.safe_search.as_str(),
        query.time_range.as_str(),
        query.normalized_text()
    );
    let digest = Sha256::digest(material.as_bytes());
    let mut hexed = hex::encode(digest);
    hexed.truncate(32);
    format!("search:{hexed}")
}

fn engine_failure(name: &str, e: Error) -> EngineFailure {
    match e {
        Error::Engine {
            engine,
            kind,
            message,
        } => EngineFailure {
            engine,
            kind,
            message,
        },
        other => EngineFailure {
            engine: name.to_string(),
            kind: EngineErrorKind::Network,
            message: other.to_string(),
        },
    }
}

/// Reproduce a shared flight error for each waiter. The variants that can
/// reach a flight outcome are all value-like; anything else degrades to a
/// backend error with the original message.
fn clone_outcome_error(e: &Error) -> Error {
    match e {
        Error::InvalidQuery(s) => Error::InvalidQuery(s.clone()),
        Error::NoEnginesAvailable => Error::NoEnginesAvailable,
        Error::NoResults => Error::NoResults,
        Error::AllEnginesFailed => Error::AllEnginesFailed,
        Error::Engine {
            engine,
            kind,
            message,
        } => Error::Engine {
            engine: engine.clone(),
            kind: *kind,
            message: message.clone(),
        },
        other => Error::Backend(other.to_string()),
    }
}
