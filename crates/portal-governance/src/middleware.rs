//! Governance middleware.
//!
//! [`GovernanceLayer`] wraps a route in a fixed chain: security headers,
//! then rate limiting, then input governance, then the handler. Any stage
//! may answer on its own; every answer, including short-circuits, carries
//! the policy headers and the quota headers of the current window.

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, warn};

use portal_telemetry::{DecisionOutcome, GovernanceMetrics, RejectionReason};

use crate::error::{GovernanceError, Result};
use crate::headers::SecurityHeaderGuard;
use crate::rate_limit::{RateLimitDecision, RateLimiter, RouteRateLimit};
use crate::validation::{read_limited, InputGovernor};

/// Largest body read ahead of rate limiting to find a body identifier.
pub const IDENTIFIER_PEEK_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Chain {
    guard: SecurityHeaderGuard,
    limiter: RateLimiter,
    route: Option<RouteRateLimit>,
    governor: InputGovernor,
    metrics: Option<GovernanceMetrics>,
}

impl Chain {
    fn record_rejection(&self, err: &GovernanceError) {
        let reason = match err {
            GovernanceError::PayloadTooLarge { .. } => RejectionReason::PayloadTooLarge,
            GovernanceError::SchemaViolation { .. } | GovernanceError::FileUploadRejected { .. } => {
                RejectionReason::Schema
            }
            GovernanceError::MalformedInput(_) => RejectionReason::Malformed,
            GovernanceError::Internal(_) | GovernanceError::Config(_) => RejectionReason::Internal,
            // Counted as a rate-limit decision instead
            GovernanceError::QuotaExceeded { .. } => return,
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(reason);
        }
    }

    fn record_decision(&self, route: &RouteRateLimit, outcome: DecisionOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(route.category().name, outcome);
        }
    }

    fn finish(
        &self,
        request_headers: &HeaderMap,
        quota: Option<&RateLimitDecision>,
        response: &mut Response,
    ) {
        if let Some(decision) = quota {
            decision.apply_headers(response.headers_mut());
        }
        self.guard.apply(request_headers, response.headers_mut());
    }

    fn reject(
        &self,
        request_headers: &HeaderMap,
        quota: Option<&RateLimitDecision>,
        err: GovernanceError,
    ) -> Response {
        if err.is_client_error() {
            warn!(policy = self.guard.name(), error = %err, "Request rejected");
        } else {
            error!(policy = self.guard.name(), error = %err, "Governance failure");
        }
        self.record_rejection(&err);

        let mut response = err.into_response();
        self.finish(request_headers, quota, &mut response);
        response
    }

    /// Run the rate-limit stage. `Err` carries a finished response.
    async fn rate_limit(
        &self,
        request: Request<Body>,
        request_headers: &HeaderMap,
    ) -> std::result::Result<(Request<Body>, Option<RateLimitDecision>), Response> {
        let Some(route) = &self.route else {
            return Ok((request, None));
        };

        let (parts, body) = request.into_parts();
        if route.should_skip(&parts) {
            self.record_decision(route, DecisionOutcome::Skipped);
            return Ok((Request::from_parts(parts, body), None));
        }

        let (body, peeked) = if route.identifier_source().needs_body() {
            match peek_body(&parts, body).await {
                Ok(peeked) => peeked,
                Err(err) => return Err(self.reject(request_headers, None, err)),
            }
        } else {
            (body, None)
        };

        let identifier = route.resolve_identifier(&parts, peeked.as_deref());
        let decision = self.limiter.check(&identifier, route.category()).await;

        if let Some(err) = decision.to_error() {
            self.record_decision(route, DecisionOutcome::Denied);
            let mut response = err.into_response();
            self.finish(request_headers, Some(&decision), &mut response);
            return Err(response);
        }

        self.record_decision(route, DecisionOutcome::Allowed);
        Ok((Request::from_parts(parts, body), Some(decision)))
    }
}

/// Read a small body so a body identifier can be resolved, returning a
/// replacement body with the same bytes.
///
/// Bodies without a declared length, or declared larger than
/// [`IDENTIFIER_PEEK_LIMIT`], are left unread.
async fn peek_body(parts: &Parts, body: Body) -> Result<(Body, Option<Bytes>)> {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(len) if len <= IDENTIFIER_PEEK_LIMIT => {
            let bytes = read_limited(body, IDENTIFIER_PEEK_LIMIT).await?;
            Ok((Body::from(bytes.clone()), Some(bytes)))
        }
        _ => Ok((body, None)),
    }
}

/// Layer applying the governance chain to a route.
#[derive(Debug, Clone)]
pub struct GovernanceLayer {
    chain: Arc<Chain>,
}

impl GovernanceLayer {
    /// Headers from `guard`, quotas from `limiter`; no route quota and
    /// default input options until configured.
    #[must_use]
    pub fn new(guard: SecurityHeaderGuard, limiter: RateLimiter) -> Self {
        Self {
            chain: Arc::new(Chain {
                guard,
                limiter,
                route: None,
                governor: InputGovernor::default(),
                metrics: None,
            }),
        }
    }

    fn map_chain(self, f: impl FnOnce(&mut Chain)) -> Self {
        let mut chain = Arc::try_unwrap(self.chain).unwrap_or_else(|shared| (*shared).clone());
        f(&mut chain);
        Self {
            chain: Arc::new(chain),
        }
    }

    /// Apply a route quota.
    #[must_use]
    pub fn with_rate_limit(self, route: RouteRateLimit) -> Self {
        self.map_chain(|chain| chain.route = Some(route))
    }

    /// Govern input with `governor`.
    #[must_use]
    pub fn with_input(self, governor: InputGovernor) -> Self {
        self.map_chain(|chain| chain.governor = governor)
    }

    /// Record decisions and rejections in `metrics`.
    #[must_use]
    pub fn with_metrics(self, metrics: GovernanceMetrics) -> Self {
        self.map_chain(|chain| chain.metrics = Some(metrics))
    }
}

impl<S> Layer<S> for GovernanceLayer {
    type Service = Governed<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Governed {
            inner,
            chain: Arc::clone(&self.chain),
        }
    }
}

/// Service produced by [`GovernanceLayer`].
#[derive(Debug, Clone)]
pub struct Governed<S> {
    inner: S,
    chain: Arc<Chain>,
}

impl<S> Service<Request<Body>> for Governed<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let chain = Arc::clone(&self.chain);
        // The polled-ready service handles this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let request_headers = request.headers().clone();

            if SecurityHeaderGuard::is_preflight(request.method()) {
                if let Some(metrics) = &chain.metrics {
                    metrics.record_preflight();
                }
                return Ok(chain.guard.preflight_response(&request_headers));
            }

            let (request, quota) = match chain.rate_limit(request, &request_headers).await {
                Ok(admitted) => admitted,
                Err(response) => return Ok(response),
            };

            let request = match chain.governor.govern(request).await {
                Ok(request) => request,
                Err(err) => return Ok(chain.reject(&request_headers, quota.as_ref(), err)),
            };

            let mut response = inner.call(request).await?;
            chain.finish(&request_headers, quota.as_ref(), &mut response);
            Ok(response)
        })
    }
}
