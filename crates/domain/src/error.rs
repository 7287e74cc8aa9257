use serde::{Deserialize, Serialize};

/// Classifies why a single upstream engine call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineErrorKind {
    Timeout,
    Http,
    Parse,
    RateLimited,
    Network,
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineErrorKind::Timeout => "timeout",
            EngineErrorKind::Http => "http",
            EngineErrorKind::Parse => "parse",
            EngineErrorKind::RateLimited => "ratelimited",
            EngineErrorKind::Network => "network",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all metasearch crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no engines available for this query")]
    NoEnginesAvailable,

    #[error("no results")]
    NoResults,

    #[error("all engines failed")]
    AllEnginesFailed,

    #[error("engine {engine} ({kind}): {message}")]
    Engine {
        engine: String,
        kind: EngineErrorKind,
        message: String,
    },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task is not skippable: {0}")]
    TaskNotSkippable(String),

    #[error("task validation: {0}")]
    TaskValidation(String),

    /// Cache miss. Distinct from [`Error::Backend`] so callers can tell
    /// "not cached" apart from "cache broken".
    #[error("key not found")]
    NotFound,

    #[error("cache backend: {0}")]
    Backend(String),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("database: {0}")]
    Database(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidQuery(_) => "invalid_query",
            Error::NoEnginesAvailable => "no_engines_available",
            Error::NoResults => "no_results",
            Error::AllEnginesFailed => "all_engines_failed",
            Error::Engine { .. } => "engine_error",
            Error::TaskNotFound(_) => "task_not_found",
            Error::TaskNotSkippable(_) => "task_not_skippable",
            Error::TaskValidation(_) => "task_validation",
            Error::NotFound => "not_found",
            Error::Backend(_) => "backend_error",
            Error::Encoding(_) => "encoding_error",
            Error::Database(_) => "database_error",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
        }
    }

    /// `true` for a cache miss (as opposed to a broken backend).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}
