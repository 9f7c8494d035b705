//! Route definitions for the portal API.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use portal_governance::{
    GovernanceLayer, InputGovernor, JsonSchema, RouteRateLimit, SanitizationOptions,
    SecurityHeaderGuard, SecurityHeadersLayer,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, BookingQuery, BookingRequest, LoginRequest, PaymentRequest};
use crate::state::AppState;

/// Body limit for JSON endpoints without a stricter preset.
pub const JSON_BODY_LIMIT: usize = 100_000;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let guards = state.guards.clone();

    let governed = |guard: &SecurityHeaderGuard| {
        GovernanceLayer::new(guard.clone(), state.limiter.clone()).with_metrics(state.metrics.clone())
    };
    let headers_only = |guard: &SecurityHeaderGuard| {
        SecurityHeadersLayer::new(guard.clone()).with_metrics(state.metrics.clone())
    };

    let login = governed(&guards.auth)
        .with_rate_limit(RouteRateLimit::auth())
        .with_input(
            InputGovernor::new(SanitizationOptions::strict())
                .with_body_schema(JsonSchema::<LoginRequest>::new()),
        );

    let bookings = governed(&guards.api)
        .with_rate_limit(RouteRateLimit::booking())
        .with_input(
            InputGovernor::new(SanitizationOptions::default().with_max_body_bytes(JSON_BODY_LIMIT))
                .with_body_schema(JsonSchema::<BookingRequest>::new())
                .with_query_schema(JsonSchema::<BookingQuery>::new()),
        );

    let payments = governed(&guards.payment)
        .with_rate_limit(RouteRateLimit::payment())
        .with_input(
            InputGovernor::new(SanitizationOptions::strict())
                .with_body_schema(JsonSchema::<PaymentRequest>::new()),
        );

    let attachments = governed(&guards.default)
        .with_rate_limit(RouteRateLimit::api())
        .with_input(InputGovernor::new(SanitizationOptions::permissive()));

    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health).layer(headers_only(&guards.default)))
        .route("/metrics", get(handlers::metrics).layer(headers_only(&guards.default)))
        // Governed API
        .route("/api/auth/login", post(handlers::login).layer(login))
        .route(
            "/api/bookings",
            get(handlers::list_bookings)
                .post(handlers::create_booking)
                .layer(bookings),
        )
        .route("/api/payments", post(handlers::create_payment).layer(payments))
        .route(
            "/api/bookings/:id/attachments",
            post(handlers::upload_attachments)
                // The governance layer already bounds the body
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(attachments),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
