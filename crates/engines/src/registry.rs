//! Engine registry.
//!
//! Constructs and holds all configured engine instances. At startup the
//! registry reads the `engines` section of the config and instantiates the
//! matching adapter for each entry. Engines that fail to initialize are
//! logged and skipped rather than aborting startup.

use std::collections::HashMap;
use std::sync::Arc;

use ms_domain::config::Config;
use ms_domain::Result;

use crate::brave::BraveEngine;
use crate::duckduckgo::DuckDuckGoEngine;
use crate::traits::Engine;

/// Records an engine that failed to initialize, for readiness reporting.
#[derive(Debug, Clone)]
pub struct EngineInitError {
    pub engine: String,
    pub error: String,
}

/// Holds all instantiated engines, keyed by name. The registry hands out
/// shared references and never mutates an engine after construction.
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
    init_errors: Vec<EngineInitError>,
}

impl EngineRegistry {
    /// Build the registry from the application config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut engines: HashMap<String, Arc<dyn Engine>> = HashMap::new();
        let mut init_errors = Vec::new();

        for (name, engine_cfg) in &config.engines {
            let result: Result<Arc<dyn Engine>> = match name.as_str() {
                "brave" => BraveEngine::from_config(engine_cfg)
                    .map(|e| Arc::new(e) as Arc<dyn Engine>),
                "duckduckgo" => DuckDuckGoEngine::from_config(engine_cfg)
                    .map(|e| Arc::new(e) as Arc<dyn Engine>),
                other => {
                    tracing::warn!(engine = %other, "unknown engine in config, skipping");
                    continue;
                }
            };

            match result {
                Ok(engine) => {
                    tracing::info!(
                        engine = %name,
                        priority = engine.priority(),
                        weight = engine.weight(),
                        "registered engine"
                    );
                    engines.insert(name.clone(), engine);
                }
                Err(e) => {
                    tracing::warn!(engine = %name, error = %e, "failed to initialize engine, skipping");
                    init_errors.push(EngineInitError {
                        engine: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            engines,
            init_errors,
        })
    }

    /// Build a registry from pre-constructed engines (tests, embedders).
    pub fn from_engines(list: Vec<Arc<dyn Engine>>) -> Self {
        let engines = list
            .into_iter()
            .map(|e| (e.name().to_string(), e))
            .collect();
        Self {
            engines,
            init_errors: Vec::new(),
        }
    }

    /// Register one more engine, replacing any previous one with the same
    /// name.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Engine>> {
        self.engines.values()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// All registered engine names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Engines that failed to initialize (empty when all succeeded).
    pub fn init_errors(&self) -> &[EngineInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubEngine;
    use ms_domain::config::EngineConfig;

    #[test]
    fn from_config_skips_unknown_and_failed_engines() {
        let mut config = Config::default();
        config
            .engines
            .insert("searchamajig".into(), EngineConfig::default());
        // brave without an api_key fails to initialize
        config.engines.insert("brave".into(), EngineConfig::default());
        config
            .engines
            .insert("duckduckgo".into(), EngineConfig::default());

        let registry = EngineRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["duckduckgo"]);
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].engine, "brave");
    }

    #[test]
    fn register_replaces_by_name() {
        let mut registry = EngineRegistry::from_engines(vec![Arc::new(
            StubEngine::new("a").with_priority(1),
        )]);
        registry.register(Arc::new(StubEngine::new("a").with_priority(9)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().priority(), 9);
    }
}
