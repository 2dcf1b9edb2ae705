//! # Hoverlate Hub
//!
//! Concrete pieces around the core: the Gemini upstream client, the SQLite
//! durable store, the action service with runtime metrics, and the REST API
//! server.

pub mod api;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod service;
pub mod store;
