//! Fixed-window rate limiting.
//!
//! A [`RateLimiter`] turns one request against one [`RateLimitCategory`]
//! into a [`RateLimitDecision`]. Counting is delegated to a
//! [`CounterStore`], so the same limiter runs against process memory or a
//! shared Redis instance.

mod store;

#[cfg(feature = "redis")]
mod redis_store;

pub use store::{
    CounterEntry, CounterStore, CounterStoreError, MemoryCounterStore, StoreResult,
    DEFAULT_CAPACITY,
};

#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;

use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitCategory;
use crate::error::GovernanceError;
use crate::identifier::ClientIdentifier;
use crate::sanitize::strip_null_bytes;

/// `X-RateLimit-Limit`
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset`
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted.
    Allow {
        /// Category quota.
        limit: u32,
        /// Requests left in the window.
        remaining: u32,
        /// When the window ends.
        reset_at: DateTime<Utc>,
    },
    /// Quota exhausted.
    Deny {
        /// Category quota.
        limit: u32,
        /// When the window ends.
        reset_at: DateTime<Utc>,
        /// Whole seconds until the window ends, at least one.
        retry_after_secs: u64,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Category quota.
    #[must_use]
    pub fn limit(&self) -> u32 {
        match self {
            Self::Allow { limit, .. } | Self::Deny { limit, .. } => *limit,
        }
    }

    /// Requests left in the window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allow { remaining, .. } => *remaining,
            Self::Deny { .. } => 0,
        }
    }

    /// When the window ends.
    #[must_use]
    pub fn reset_at(&self) -> DateTime<Utc> {
        match self {
            Self::Allow { reset_at, .. } | Self::Deny { reset_at, .. } => *reset_at,
        }
    }

    /// Write the quota headers, plus `Retry-After` on denial.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(self.limit()));
        headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(self.remaining()));

        let reset = self.reset_at().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Ok(value) = HeaderValue::from_str(&reset) {
            headers.insert(X_RATELIMIT_RESET.clone(), value);
        }

        if let Self::Deny {
            retry_after_secs, ..
        } = self
        {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
    }

    /// The 429 error for a denial.
    #[must_use]
    pub fn to_error(&self) -> Option<GovernanceError> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny {
                retry_after_secs, ..
            } => Some(GovernanceError::QuotaExceeded {
                retry_after_secs: *retry_after_secs,
            }),
        }
    }
}

/// Fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.name())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RateLimiter {
    /// Create a limiter over the given store, using the wall clock.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a limiter over a default in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::default()))
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Register one request from `identifier` against `category`.
    ///
    /// A store failure admits the request with a full quota.
    pub async fn check(&self, identifier: &str, category: &RateLimitCategory) -> RateLimitDecision {
        let now = self.clock.now();
        let key = counter_key(identifier, category);

        match self.store.increment(&key, category.window(), now).await {
            Ok(entry) => {
                let decision = decide(&entry, category, now);
                if decision.is_allowed() {
                    debug!(
                        category = category.name,
                        identifier,
                        count = entry.count,
                        "Rate limit check passed"
                    );
                } else {
                    warn!(
                        category = category.name,
                        identifier,
                        count = entry.count,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    category = category.name,
                    identifier,
                    store = self.store.name(),
                    error = %e,
                    "Counter store unavailable, admitting request"
                );
                RateLimitDecision::Allow {
                    limit: category.max_requests,
                    remaining: category.max_requests,
                    reset_at: now + store::to_delta(category.window()),
                }
            }
        }
    }

    /// Purge counters that can no longer matter.
    pub async fn sweep(&self) -> StoreResult<usize> {
        self.store.sweep(self.clock.now()).await
    }
}

/// Composite counter key for an identifier and category.
#[must_use]
pub fn counter_key(identifier: &str, category: &RateLimitCategory) -> String {
    format!("{identifier}:{}", category.name)
}

fn decide(entry: &CounterEntry, category: &RateLimitCategory, now: DateTime<Utc>) -> RateLimitDecision {
    let limit = category.max_requests;

    if entry.count <= u64::from(limit) {
        return RateLimitDecision::Allow {
            limit,
            remaining: limit - entry.count as u32,
            reset_at: entry.window_reset_at,
        };
    }

    let millis = (entry.window_reset_at - now).num_milliseconds().max(0) as u64;
    RateLimitDecision::Deny {
        limit,
        reset_at: entry.window_reset_at,
        retry_after_secs: millis.div_ceil(1000).max(1),
    }
}

/// Predicate deciding whether a request bypasses rate limiting.
pub type SkipPredicate = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Function deriving a custom identifier from request parts.
pub type IdentifierFn = Arc<dyn Fn(&Parts) -> Option<String> + Send + Sync>;

/// Where the rate-limit identifier of a route comes from.
#[derive(Clone)]
pub enum IdentifierSource {
    /// Client fingerprint from proxy headers and user agent.
    Client,
    /// A string field of the JSON body, falling back to the client
    /// fingerprint when absent.
    BodyField(String),
    /// Caller supplied function, falling back to the client fingerprint
    /// when it yields `None`.
    Custom(IdentifierFn),
}

impl IdentifierSource {
    /// Whether the body must be read to resolve the identifier.
    #[must_use]
    pub fn needs_body(&self) -> bool {
        matches!(self, Self::BodyField(_))
    }
}

impl fmt::Debug for IdentifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("Client"),
            Self::BodyField(field) => f.debug_tuple("BodyField").field(field).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Rate-limit settings of one route, fixed at registration time.
#[derive(Clone)]
pub struct RouteRateLimit {
    category: RateLimitCategory,
    skip: Option<SkipPredicate>,
    identifier: IdentifierSource,
}

impl fmt::Debug for RouteRateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRateLimit")
            .field("category", &self.category.name)
            .field("skip", &self.skip.is_some())
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl RouteRateLimit {
    /// Limit a route by client fingerprint under `category`.
    #[must_use]
    pub fn new(category: RateLimitCategory) -> Self {
        Self {
            category,
            skip: None,
            identifier: IdentifierSource::Client,
        }
    }

    /// General API traffic.
    #[must_use]
    pub fn api() -> Self {
        Self::new(RateLimitCategory::DEFAULT)
    }

    /// Credential endpoints, counted per submitted account email.
    #[must_use]
    pub fn auth() -> Self {
        Self::new(RateLimitCategory::AUTH)
            .with_identifier(IdentifierSource::BodyField("email".to_string()))
    }

    /// Payment endpoints.
    #[must_use]
    pub fn payment() -> Self {
        Self::new(RateLimitCategory::PAYMENT)
    }

    /// Booking creation and changes; reads are not counted.
    #[must_use]
    pub fn booking() -> Self {
        Self::new(RateLimitCategory::BOOKING).skip_safe_methods()
    }

    /// Bypass the check whenever `predicate` holds.
    #[must_use]
    pub fn with_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Bypass the check for `GET`, `HEAD` and `OPTIONS`.
    #[must_use]
    pub fn skip_safe_methods(self) -> Self {
        self.with_skip(|parts| {
            matches!(parts.method, Method::GET | Method::HEAD | Method::OPTIONS)
        })
    }

    /// Set the identifier source.
    #[must_use]
    pub fn with_identifier(mut self, identifier: IdentifierSource) -> Self {
        self.identifier = identifier;
        self
    }

    /// Quota category.
    #[must_use]
    pub fn category(&self) -> &RateLimitCategory {
        &self.category
    }

    /// Identifier source.
    #[must_use]
    pub fn identifier_source(&self) -> &IdentifierSource {
        &self.identifier
    }

    /// Whether this request bypasses the check.
    #[must_use]
    pub fn should_skip(&self, parts: &Parts) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(parts))
    }

    /// Resolve the identifier for a request. `body` is consulted only for
    /// [`IdentifierSource::BodyField`].
    #[must_use]
    pub fn resolve_identifier(&self, parts: &Parts, body: Option<&[u8]>) -> String {
        let custom = match &self.identifier {
            IdentifierSource::Client => None,
            IdentifierSource::BodyField(field) => {
                body.and_then(|bytes| identifier_from_body(bytes, field))
            }
            IdentifierSource::Custom(f) => f(parts),
        };

        custom.unwrap_or_else(|| ClientIdentifier::from_parts(parts).into_string())
    }
}

/// Read `field` from a JSON object body as a normalized identifier.
///
/// Keys and values go through the sanitizer's NUL stripping and trimming,
/// so the identifier names the same value the handler receives. Values are
/// also lowercased so that `Alice@Example.com ` and `alice@example.com`
/// share a quota.
#[must_use]
pub fn identifier_from_body(body: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let raw = value
        .as_object()?
        .iter()
        .rev()
        .find(|(key, _)| strip_null_bytes(key).trim() == field)?
        .1
        .as_str()?;

    let normalized = strip_null_bytes(raw).trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    Some(format!("{field}:{normalized}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap()
    }

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let limiter = RateLimiter::in_memory().with_clock(clock.clone());
        (limiter, clock)
    }

    fn parts(method: Method) -> Parts {
        let request = Request::builder()
            .method(method)
            .uri("/api/auth/login")
            .header("x-real-ip", "203.0.113.9")
            .header("user-agent", "curl/8.4.0")
            .body(Body::empty())
            .unwrap();
        request.into_parts().0
    }

    #[tokio::test]
    async fn test_auth_quota_denies_sixth_request() {
        let (limiter, _) = limiter();
        let auth = RateLimitCategory::AUTH;

        for n in 1..=5u32 {
            let decision = limiter.check("X", &auth).await;
            assert!(decision.is_allowed(), "request {n} should pass");
            assert_eq!(decision.remaining(), 5 - n);
        }

        match limiter.check("X", &auth).await {
            RateLimitDecision::Deny {
                retry_after_secs, ..
            } => assert!((1..=900).contains(&retry_after_secs)),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_window_elapses_and_count_restarts() {
        let (limiter, clock) = limiter();
        let auth = RateLimitCategory::AUTH;
        for _ in 0..6 {
            limiter.check("X", &auth).await;
        }

        clock.advance(Duration::from_millis(900_001));
        let decision = limiter.check("X", &auth).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.remaining(), 4);
    }

    #[tokio::test]
    async fn test_identifiers_do_not_share_quota() {
        let (limiter, _) = limiter();
        let auth = RateLimitCategory::AUTH;
        for _ in 0..6 {
            limiter.check("A", &auth).await;
        }

        let decision = limiter.check("B", &auth).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.remaining(), 4);
    }

    #[tokio::test]
    async fn test_categories_do_not_share_quota() {
        let (limiter, _) = limiter();
        for _ in 0..6 {
            limiter.check("A", &RateLimitCategory::AUTH).await;
        }
        assert!(limiter.check("A", &RateLimitCategory::PAYMENT).await.is_allowed());
    }

    #[tokio::test]
    async fn test_retry_after_rounds_up() {
        let (limiter, clock) = limiter();
        let tight = RateLimitCategory::new("tight", 1, 10_000);
        limiter.check("A", &tight).await;

        clock.advance(Duration::from_millis(8_500));
        let decision = limiter.check("A", &tight).await;
        assert_eq!(
            decision,
            RateLimitDecision::Deny {
                limit: 1,
                reset_at: t0() + chrono::Duration::seconds(10),
                retry_after_secs: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_retry_after_is_at_least_one_at_reset_instant() {
        let (limiter, clock) = limiter();
        let tight = RateLimitCategory::new("tight", 1, 10_000);
        limiter.check("A", &tight).await;

        clock.advance(Duration::from_secs(10));
        match limiter.check("A", &tight).await {
            RateLimitDecision::Deny {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 1),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_admit_exactly_max() {
        let (limiter, _) = limiter();
        let booking = RateLimitCategory::BOOKING;

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check("hot", &booking).await.is_allowed() })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, booking.max_requests);
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait::async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(
            &self,
            _key: &str,
            _window: std::time::Duration,
            _now: DateTime<Utc>,
        ) -> StoreResult<CounterEntry> {
            Err(CounterStoreError::Connection("refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }

        fn is_distributed(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let decision = limiter.check("A", &RateLimitCategory::AUTH).await;
        assert!(decision.is_allowed());
        assert_eq!(decision.remaining(), 5);
    }

    #[test]
    fn test_deny_headers() {
        let decision = RateLimitDecision::Deny {
            limit: 5,
            reset_at: t0(),
            retry_after_secs: 42,
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);

        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "2024-05-20T09:30:00.000Z");
        assert_eq!(headers["retry-after"], "42");
        assert!(matches!(
            decision.to_error(),
            Some(GovernanceError::QuotaExceeded {
                retry_after_secs: 42
            })
        ));
    }

    #[test]
    fn test_allow_headers_have_no_retry_after() {
        let decision = RateLimitDecision::Allow {
            limit: 100,
            remaining: 99,
            reset_at: t0(),
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);

        assert_eq!(headers["x-ratelimit-remaining"], "99");
        assert!(headers.get("retry-after").is_none());
        assert!(decision.to_error().is_none());
    }

    #[test]
    fn test_counter_key() {
        assert_eq!(counter_key("1.2.3.4:Y3VybC84Lj", &RateLimitCategory::AUTH), "1.2.3.4:Y3VybC84Lj:auth");
    }

    #[test]
    fn test_booking_route_skips_reads() {
        let route = RouteRateLimit::booking();
        assert!(route.should_skip(&parts(Method::GET)));
        assert!(!route.should_skip(&parts(Method::POST)));
        assert!(!RouteRateLimit::api().should_skip(&parts(Method::GET)));
    }

    #[test]
    fn test_auth_route_uses_email() {
        let route = RouteRateLimit::auth();
        let parts = parts(Method::POST);

        let id = route.resolve_identifier(&parts, Some(br#"{"email":" Alice@Example.com ","password":"x"}"#));
        assert_eq!(id, "email:alice@example.com");

        let fallback = route.resolve_identifier(&parts, Some(br#"{"password":"x"}"#));
        assert_eq!(fallback, "203.0.113.9:Y3VybC84Lj");

        let not_json = route.resolve_identifier(&parts, Some(b"email=alice"));
        assert_eq!(not_json, "203.0.113.9:Y3VybC84Lj");
    }

    #[test]
    fn test_body_identifier_matches_sanitized_field() {
        let route = RouteRateLimit::auth();
        let parts = parts(Method::POST);

        let nul_value = route.resolve_identifier(&parts, Some(br#"{"email":"victim@example.com\u0000"}"#));
        assert_eq!(nul_value, "email:victim@example.com");

        let padded_key = route.resolve_identifier(&parts, Some(br#"{"email ":"victim@example.com"}"#));
        assert_eq!(padded_key, "email:victim@example.com");

        let nul_only = route.resolve_identifier(&parts, Some(br#"{"email":"\u0000 "}"#));
        assert_eq!(nul_only, "203.0.113.9:Y3VybC84Lj");
    }

    #[test]
    fn test_custom_identifier() {
        let route = RouteRateLimit::api().with_identifier(IdentifierSource::Custom(Arc::new(|parts| {
            parts
                .headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(|key| format!("key:{key}"))
        })));

        let parts = parts(Method::GET);
        assert_eq!(route.resolve_identifier(&parts, None), "203.0.113.9:Y3VybC84Lj");
        assert!(!route.identifier_source().needs_body());
    }
}
