//! Upstream search engines.
//!
//! Defines the [`Engine`](traits::Engine) contract every upstream adapter
//! implements, the registry that instantiates and holds them, and the
//! concrete JSON-API adapters. HTML-scraping engines plug in through the
//! same trait but live outside this crate.

pub mod brave;
pub mod duckduckgo;
pub mod registry;
pub mod stub;
pub mod traits;
mod util;

pub use registry::EngineRegistry;
pub use stub::StubEngine;
pub use traits::{Engine, EngineMeta};
