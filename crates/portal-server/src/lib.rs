//! # Portal Server
//!
//! HTTP server wiring the booking portal governance layer.
//!
//! This crate provides:
//! - TOML configuration with `PORTAL_*` environment overrides
//! - Axum routes for stand-in booking endpoints, each behind its own
//!   governance chain
//! - Periodic counter sweeping and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use config::{ConfigError, RateLimitStoreConfig, ServerConfig, StoreBackend};
pub use error::ServerError;
pub use routes::create_router;
pub use server::{run, Server};
pub use state::{AppState, AppStateBuilder, Guards};
