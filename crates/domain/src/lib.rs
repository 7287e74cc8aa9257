//! Shared domain types for the metasearch core.
//!
//! Everything the aggregator, cache, engines, and scheduler crates exchange
//! lives here: the [`Query`](query::Query) input model, result and response
//! shapes, the configuration tree, and the shared [`Error`](error::Error)
//! enum.

pub mod config;
pub mod error;
pub mod query;
pub mod response;
pub mod result;

pub use error::{EngineErrorKind, Error, Result};
pub use query::{Category, Query, SafeSearch, TimeRange};
pub use result::{AggregatedResults, EngineFailure, SearchResult};
