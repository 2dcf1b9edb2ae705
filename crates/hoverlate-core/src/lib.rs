//! # Hoverlate Core
//!
//! Request orchestration for hover translation: model selection, rate
//! limiting, cooldown bookkeeping, response caching, and the fallback loop
//! that ties them together. No network code lives here; the upstream model
//! API and the durable store are traits implemented elsewhere.

pub mod cache;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod events;
pub mod limiter;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod selector;
pub mod settings;
pub mod store;
pub mod upstream;

pub use error::{HoverlateError, Result};
pub use orchestrator::Orchestrator;
