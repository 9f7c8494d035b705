//! Server startup errors.

use portal_governance::{CounterStoreError, GovernanceError};

use crate::config::ConfigError;

/// Errors that stop the server from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A security policy failed to compile.
    #[error("Failed to compile security policy: {0}")]
    Policy(#[from] GovernanceError),

    /// The counter store could not be reached.
    #[error("Failed to open counter store: {0}")]
    Store(#[from] CounterStoreError),

    /// Metrics registration failed.
    #[error("Failed to register metrics: {0}")]
    Metrics(String),

    /// The Redis backend was configured but not compiled in.
    #[error("The redis backend requires building with the `redis` feature")]
    RedisUnavailable,

    /// Listener or connection failure.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
