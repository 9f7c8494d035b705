//! Governance error types.
//!
//! Every variant maps to one HTTP status and one JSON body shape. The
//! bodies are part of the client contract and must not change.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Result type for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Which part of the request an input issue refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputTarget {
    /// JSON request body.
    Body,
    /// URL query string.
    Query,
}

impl fmt::Display for InputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body => f.write_str("body"),
            Self::Query => f.write_str("query"),
        }
    }
}

/// One issue reported by the schema engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable message.
    pub message: String,
    /// Machine readable code.
    pub code: String,
}

impl FieldIssue {
    /// Create a new field issue.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.code)
    }
}

/// Governance error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernanceError {
    /// Category quota exhausted for the current window.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        /// Whole seconds until the window resets.
        retry_after_secs: u64,
    },

    /// Request body larger than the configured limit.
    #[error("Request payload exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured byte limit.
        limit: usize,
    },

    /// Schema engine rejected the sanitized input.
    #[error("Invalid request {target}: {} issue(s)", issues.len())]
    SchemaViolation {
        /// Part of the request that failed.
        target: InputTarget,
        /// Issues relayed from the schema engine.
        issues: Vec<FieldIssue>,
    },

    /// One or more uploaded files violated the upload policy.
    #[error("File upload rejected: {}", errors.join("; "))]
    FileUploadRejected {
        /// Every violated constraint.
        errors: Vec<String>,
    },

    /// Input could not be decoded.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Unexpected failure while governing input.
    #[error("Internal governance failure: {0}")]
    Internal(String),

    /// Invalid governance configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GovernanceError {
    /// Create a malformed input error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if error is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Get HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SchemaViolation { .. } => StatusCode::BAD_REQUEST,
            Self::FileUploadRejected { .. } => StatusCode::BAD_REQUEST,
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the client.
    #[must_use]
    pub fn to_body(&self) -> Value {
        match self {
            Self::QuotaExceeded { retry_after_secs } => json!({
                "success": false,
                "message": "Too many requests",
                "error": "Rate limit exceeded",
                "retryAfter": retry_after_secs,
            }),
            Self::PayloadTooLarge { .. } => json!({
                "success": false,
                "message": "Request payload too large",
                "error": "PAYLOAD_TOO_LARGE",
            }),
            Self::SchemaViolation { target, issues } => json!({
                "success": false,
                "message": match target {
                    InputTarget::Body => "Invalid request body",
                    InputTarget::Query => "Invalid query parameters",
                },
                "errors": issues,
            }),
            Self::FileUploadRejected { errors } => json!({
                "success": false,
                "message": "File upload rejected",
                "errors": errors,
            }),
            Self::MalformedInput(message) => json!({
                "success": false,
                "message": message,
                "error": "INVALID_REQUEST",
            }),
            // Internal details stay in the logs
            Self::Internal(_) | Self::Config(_) => json!({
                "success": false,
                "message": "Internal server error during validation",
                "error": "VALIDATION_ERROR",
            }),
        }
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}
