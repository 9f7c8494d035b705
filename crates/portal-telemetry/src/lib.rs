//! # Portal Telemetry
//!
//! Observability for the booking portal gateway.
//!
//! This crate provides:
//! - Structured logging setup on top of `tracing-subscriber`
//! - Prometheus counters for governance decisions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

// Re-export main types
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::{DecisionOutcome, GovernanceMetrics, RejectionReason};
