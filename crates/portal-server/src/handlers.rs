//! Stand-in booking handlers.
//!
//! The handlers only echo governed input back; they exist so the governance
//! layer can be exercised end to end.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use portal_governance::{validate_uploads, GovernanceError, UploadedFile};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};
use validator::Validate;

use crate::state::AppState;

/// Login payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Account email.
    #[validate(email)]
    pub email: String,
    /// Account password.
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

/// Guest contact details on a booking.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Contact {
    /// Full name.
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Contact email.
    #[validate(email)]
    pub email: String,
    /// Phone number.
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

/// Booking creation payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BookingRequest {
    /// Listing being booked.
    #[validate(length(min = 1, max = 64))]
    pub listing_id: String,
    /// Arrival date.
    pub check_in: NaiveDate,
    /// Departure date.
    pub check_out: NaiveDate,
    /// Number of guests.
    #[validate(range(min = 1, max = 16))]
    pub guests: u32,
    /// Lead guest.
    #[validate(nested)]
    pub contact: Contact,
    /// Free-text requests.
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Booking list filters. Query values arrive as strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BookingQuery {
    /// Booking status filter.
    #[serde(default)]
    #[validate(length(min = 1, max = 20))]
    pub status: Option<String>,
    /// Guest email filter.
    #[serde(default)]
    #[validate(email)]
    pub guest: Option<String>,
    /// Listing filter.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub listing: Option<String>,
}

/// Payment intent payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentRequest {
    /// Booking being paid.
    #[validate(length(min = 1, max = 64))]
    pub booking_id: String,
    /// Amount in minor units.
    #[validate(range(min = 1))]
    pub amount_cents: u64,
    /// ISO 4217 code.
    #[validate(length(equal = 3))]
    pub currency: String,
}

/// Liveness and backend summary.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "environment": state.environment,
        "counterStore": state.limiter.store().name(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus exposition of governance counters.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Accept a governed login.
pub async fn login(Json(request): Json<LoginRequest>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Login accepted",
        "email": request.email,
    }))
}

/// Accept a governed booking.
pub async fn create_booking(Json(booking): Json<BookingRequest>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": booking,
        })),
    )
}

/// Echo governed booking filters.
pub async fn list_bookings(Query(filters): Query<BookingQuery>) -> Json<Value> {
    Json(json!({
        "success": true,
        "filters": filters,
        "bookings": [],
    }))
}

/// Accept a governed payment intent.
pub async fn create_payment(Json(payment): Json<PaymentRequest>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "payment": payment,
        })),
    )
}

/// Validate attachment metadata for a booking.
pub async fn upload_attachments(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), GovernanceError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| GovernanceError::malformed("Invalid multipart body"))?
    {
        let Some(filename) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|_| GovernanceError::malformed("Invalid multipart body"))?;

        files.push(UploadedFile::new(filename, content_type, data.len()));
    }

    let validation = validate_uploads(&files, &state.uploads);
    if !validation.valid {
        warn!(
            booking_id = %booking_id,
            errors = validation.errors.len(),
            "Upload rejected"
        );
        state.metrics.record_upload_rejection();
    }
    validation.into_result()?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "bookingId": booking_id,
            "files": files,
        })),
    ))
}
