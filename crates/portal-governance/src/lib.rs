//! # Portal Governance
//!
//! Request governance for the booking portal API.
//!
//! ## Features
//!
//! - **Rate Limiting**: Fixed-window quotas per client and category, backed by
//!   a bounded in-process store or Redis
//! - **Security Headers**: CSP, HSTS, CORS and the usual hardening headers
//! - **Input Governance**: Sanitization, size limits and schema checks for
//!   JSON bodies and query strings
//! - **Upload Validation**: File count, size, type and name checks
//!
//! ## Example
//!
//! ```rust,no_run
//! use portal_governance::{
//!     Environment, GovernanceLayer, RateLimiter, RouteRateLimit, SecurityHeaderGuard,
//!     SecurityPolicy,
//! };
//!
//! let guard = SecurityHeaderGuard::compile(
//!     &SecurityPolicy::auth(vec!["https://portal.example".into()]),
//!     Environment::Production,
//! )
//! .unwrap();
//! let layer = GovernanceLayer::new(guard, RateLimiter::in_memory())
//!     .with_rate_limit(RouteRateLimit::auth());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod headers;
pub mod identifier;
pub mod middleware;
pub mod rate_limit;
pub mod sanitize;
pub mod upload;
pub mod validation;

pub use cache::BoundedCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Environment, RateLimitCategory, SanitizationOptions};
pub use error::{FieldIssue, GovernanceError, InputTarget, Result};
pub use headers::{
    CorsOrigin, CorsPolicy, CspBuilder, HstsPolicy, SecurityHeaderGuard, SecurityHeaders,
    SecurityHeadersLayer, SecurityPolicies, SecurityPolicy,
};
pub use identifier::ClientIdentifier;
pub use middleware::{GovernanceLayer, Governed};
#[cfg(feature = "redis")]
pub use rate_limit::RedisCounterStore;
pub use rate_limit::{
    CounterStore, CounterStoreError, IdentifierSource, MemoryCounterStore, RateLimitDecision,
    RateLimiter, RouteRateLimit,
};
pub use sanitize::Sanitizer;
pub use upload::{validate_uploads, FileUploadPolicy, UploadValidation, UploadedFile};
pub use validation::{InputGovernor, JsonSchema, Schema, SchemaError};
