//! Schema validation and the input governor.
//!
//! The governor owns no schemas. Routes hand it a [`Schema`]; the governor
//! sanitizes the raw input, lets the schema parse it and relays whatever
//! issues the schema reports.

use axum::body::Body;
use axum::http::{header, uri::PathAndQuery, HeaderValue, Request, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::config::SanitizationOptions;
use crate::error::{FieldIssue, GovernanceError, InputTarget, Result};
use crate::sanitize::{looks_malicious, Sanitizer};

/// Field name used when an issue cannot be tied to a field.
pub const ROOT_FIELD: &str = "(root)";

/// Why a schema refused a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The value does not have the declared shape.
    Invalid(Vec<FieldIssue>),
    /// The schema itself failed.
    Internal(String),
}

/// Parser for one endpoint's input shape.
pub trait Schema: Send + Sync {
    /// Parse `value`, returning the normalized value on success.
    fn parse(&self, value: Value) -> std::result::Result<Value, SchemaError>;
}

impl<F> Schema for F
where
    F: Fn(Value) -> std::result::Result<Value, SchemaError> + Send + Sync,
{
    fn parse(&self, value: Value) -> std::result::Result<Value, SchemaError> {
        self(value)
    }
}

/// Schema backed by a serde type carrying `validator` rules.
///
/// Parsing deserializes into `T`, runs `T::validate`, and re-serializes, so
/// defaults are filled in and unknown fields handled as `T` declares.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    /// Create the schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Schema for JsonSchema<T>
where
    T: DeserializeOwned + Validate + Serialize,
{
    fn parse(&self, value: Value) -> std::result::Result<Value, SchemaError> {
        let parsed: T =
            serde_json::from_value(value).map_err(|e| SchemaError::Invalid(vec![serde_issue(&e)]))?;

        parsed
            .validate()
            .map_err(|errors| SchemaError::Invalid(validation_issues(&errors)))?;

        serde_json::to_value(&parsed).map_err(|e| SchemaError::Internal(e.to_string()))
    }
}

static FIELD_IN_MESSAGE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(missing|unknown) field `([^`]+)`").ok());

/// Turn a deserialization error into a field issue.
#[must_use]
pub fn serde_issue(error: &serde_json::Error) -> FieldIssue {
    let message = error.to_string();

    let captures = FIELD_IN_MESSAGE
        .as_ref()
        .and_then(|re| re.captures(&message));
    if let Some(captures) = captures {
        let kind = captures.get(1).map_or("missing", |m| m.as_str());
        let field = captures.get(2).map_or(ROOT_FIELD, |m| m.as_str());
        return FieldIssue::new(field, message.clone(), format!("{kind}_field"));
    }

    FieldIssue::new(ROOT_FIELD, message, "invalid_type")
}

/// Flatten `validator` errors into field issues with dotted paths.
///
/// Issues are sorted by field so the response order is stable.
#[must_use]
pub fn validation_issues(errors: &ValidationErrors) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    collect_issues("", errors, &mut issues);
    issues.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));
    issues
}

fn collect_issues(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldIssue>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error.message.as_ref().map_or_else(
                        || format!("failed '{}' validation", error.code),
                        ToString::to_string,
                    );
                    out.push(FieldIssue::new(path.clone(), message, error.code.to_string()));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_issues(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_issues(&format!("{path}.{index}"), inner, out);
                }
            }
        }
    }
}

/// Whether a content type names a JSON document.
#[must_use]
pub fn is_json_content_type(value: &HeaderValue) -> bool {
    value
        .to_str()
        .ok()
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| {
            m.type_() == mime::APPLICATION
                && (m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON))
        })
}

/// Size, sanitization and schema enforcement for one route.
#[derive(Clone, Default)]
pub struct InputGovernor {
    sanitizer: Sanitizer,
    body_schema: Option<Arc<dyn Schema>>,
    query_schema: Option<Arc<dyn Schema>>,
}

impl fmt::Debug for InputGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputGovernor")
            .field("options", self.sanitizer.options())
            .field("body_schema", &self.body_schema.is_some())
            .field("query_schema", &self.query_schema.is_some())
            .finish()
    }
}

impl InputGovernor {
    /// Create a governor with no schemas.
    #[must_use]
    pub fn new(options: SanitizationOptions) -> Self {
        Self {
            sanitizer: Sanitizer::new(options),
            body_schema: None,
            query_schema: None,
        }
    }

    /// Parse JSON bodies with `schema`.
    #[must_use]
    pub fn with_body_schema<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.body_schema = Some(Arc::new(schema));
        self
    }

    /// Parse the query string with `schema`.
    ///
    /// The schema sees an object of strings: a repeated key keeps only its
    /// last value and numbers arrive unparsed, so fields must be declared
    /// as strings (or deserialized from strings).
    #[must_use]
    pub fn with_query_schema<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.query_schema = Some(Arc::new(schema));
        self
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &SanitizationOptions {
        self.sanitizer.options()
    }

    /// Sanitize `value` and parse it with the schema for `target`, if any.
    pub fn govern_value(&self, value: Value, target: InputTarget) -> Result<Value> {
        let sanitized = self.sanitizer.sanitize_value(value)?;

        let schema = match target {
            InputTarget::Body => self.body_schema.as_ref(),
            InputTarget::Query => self.query_schema.as_ref(),
        };
        let Some(schema) = schema else {
            return Ok(sanitized);
        };

        schema.parse(sanitized).map_err(|e| match e {
            SchemaError::Invalid(issues) => {
                debug!(%target, issues = issues.len(), "Schema rejected input");
                GovernanceError::SchemaViolation { target, issues }
            }
            SchemaError::Internal(msg) => GovernanceError::internal(msg),
        })
    }

    /// Govern a whole request: size check, then query, then body.
    ///
    /// On success the returned request carries the sanitized and parsed
    /// query and body.
    pub async fn govern(&self, request: Request<Body>) -> Result<Request<Body>> {
        let limit = self.options().max_body_bytes;
        let (mut parts, body) = request.into_parts();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            warn!(limit, declared = ?declared, "Request payload too large");
            return Err(GovernanceError::PayloadTooLarge { limit });
        }

        let bytes = read_limited(body, limit).await?;

        if parts.uri.query().is_some() || self.query_schema.is_some() {
            parts.uri = self.govern_query(&parts.uri)?;
        }

        let is_json = parts
            .headers
            .get(header::CONTENT_TYPE)
            .map_or(self.body_schema.is_some() && !bytes.is_empty(), is_json_content_type);

        if !is_json {
            if self.body_schema.is_some() && !bytes.is_empty() {
                debug!(path = %parts.uri.path(), "Non-JSON body on a schema-bound route");
                return Err(GovernanceError::malformed("Invalid request body"));
            }
            return Ok(Request::from_parts(parts, Body::from(bytes)));
        }

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| GovernanceError::malformed("Invalid JSON body"))?;
            if looks_malicious(text) {
                warn!(path = %parts.uri.path(), "Injection markers in request body");
            }
            serde_json::from_str(text).map_err(|_| GovernanceError::malformed("Invalid JSON body"))?
        };

        if value.is_null() && self.body_schema.is_none() {
            return Ok(Request::from_parts(parts, Body::from(bytes)));
        }

        let governed = self.govern_value(value, InputTarget::Body)?;
        let encoded = serde_json::to_vec(&governed).map_err(|e| {
            error!(error = %e, "Failed to re-encode governed body");
            GovernanceError::internal(e.to_string())
        })?;

        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        Ok(Request::from_parts(parts, Body::from(encoded)))
    }

    fn govern_query(&self, uri: &Uri) -> Result<Uri> {
        let raw = uri.query().unwrap_or_default();
        if looks_malicious(raw) {
            warn!(path = %uri.path(), "Injection markers in query string");
        }

        let mut map = Map::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            map.insert(key.into_owned(), Value::String(value.into_owned()));
        }

        let governed = self.govern_value(Value::Object(map), InputTarget::Query)?;
        let query = encode_query(&governed);

        let path_and_query = if query.is_empty() {
            uri.path().to_string()
        } else {
            format!("{}?{query}", uri.path())
        };

        let mut uri_parts = uri.clone().into_parts();
        uri_parts.path_and_query = Some(
            PathAndQuery::try_from(path_and_query)
                .map_err(|e| GovernanceError::internal(format!("rebuilt query is invalid: {e}")))?,
        );
        Uri::from_parts(uri_parts)
            .map_err(|e| GovernanceError::internal(format!("rebuilt URI is invalid: {e}")))
    }
}

/// Read a body, failing with 413 past `limit` bytes.
pub async fn read_limited(body: Body, limit: usize) -> Result<Bytes> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit, "Request payload too large");
            Err(GovernanceError::PayloadTooLarge { limit })
        }
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            Err(GovernanceError::malformed("Failed to read request body"))
        }
    }
}

/// Encode a governed query object back into `application/x-www-form-urlencoded`.
fn encode_query(value: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());

    if let Value::Object(map) = value {
        for (key, item) in map {
            match item {
                Value::Null => {}
                Value::String(s) => {
                    serializer.append_pair(key, s);
                }
                Value::Array(items) => {
                    for item in items {
                        serializer.append_pair(key, &scalar_text(item));
                    }
                }
                other => {
                    serializer.append_pair(key, &scalar_text(other));
                }
            }
        }
    }
    serializer.finish()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, Validate)]
    struct Guest {
        #[validate(length(min = 1, max = 80))]
        name: String,
        #[validate(email)]
        email: String,
    }

    #[derive(Debug, Serialize, Deserialize, Validate)]
    #[serde(deny_unknown_fields)]
    struct Booking {
        #[validate(length(min = 1))]
        room_id: String,
        #[validate(range(min = 1, max = 30))]
        nights: u32,
        #[validate(nested)]
        guest: Guest,
        #[serde(default)]
        notes: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize, Validate)]
    struct Listing {
        #[serde(default)]
        city: Option<String>,
        #[validate(length(max = 3))]
        #[serde(default)]
        page: Option<String>,
    }

    fn governor() -> InputGovernor {
        InputGovernor::new(SanitizationOptions::default())
            .with_body_schema(JsonSchema::<Booking>::new())
            .with_query_schema(JsonSchema::<Listing>::new())
    }

    fn json_request(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(request: Request<Body>) -> Value {
        let bytes = request.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn valid_booking() -> Value {
        json!({
            "room_id": "R-101",
            "nights": 2,
            "guest": {"name": "  <b>Ann</b> ", "email": "ann@example.com"}
        })
    }

    #[test]
    fn test_json_schema_accepts_and_normalizes() {
        let parsed = JsonSchema::<Booking>::new().parse(valid_booking()).unwrap();
        assert_eq!(parsed["notes"], Value::Null);
        assert_eq!(parsed["nights"], 2);
    }

    #[test]
    fn test_validator_issues_have_dotted_paths() {
        let mut value = valid_booking();
        value["nights"] = json!(45);
        value["guest"]["email"] = json!("not-an-email");

        let Err(SchemaError::Invalid(issues)) = JsonSchema::<Booking>::new().parse(value) else {
            panic!("expected schema issues");
        };
        let fields: Vec<_> = issues.iter().map(|i| (i.field.as_str(), i.code.as_str())).collect();
        assert_eq!(fields, vec![("guest.email", "email"), ("nights", "range")]);
    }

    #[test]
    fn test_missing_and_unknown_fields() {
        let Err(SchemaError::Invalid(issues)) =
            JsonSchema::<Booking>::new().parse(json!({"nights": 2}))
        else {
            panic!("expected schema issues");
        };
        assert_eq!(issues[0].code, "missing_field");
        assert_eq!(issues[0].field, "room_id");

        let mut value = valid_booking();
        value["coupon"] = json!("FREE");
        let Err(SchemaError::Invalid(issues)) = JsonSchema::<Booking>::new().parse(value) else {
            panic!("expected schema issues");
        };
        assert_eq!(issues[0].code, "unknown_field");
        assert_eq!(issues[0].field, "coupon");
    }

    #[test]
    fn test_wrong_type_issue() {
        let mut value = valid_booking();
        value["nights"] = json!("two");
        let Err(SchemaError::Invalid(issues)) = JsonSchema::<Booking>::new().parse(value) else {
            panic!("expected schema issues");
        };
        assert_eq!(issues[0].field, ROOT_FIELD);
        assert_eq!(issues[0].code, "invalid_type");
    }

    #[test]
    fn test_closure_schema() {
        let schema = |value: Value| {
            if value.get("id").is_some() {
                Ok(value)
            } else {
                Err(SchemaError::Invalid(vec![FieldIssue::new("id", "required", "required")]))
            }
        };
        let governor = InputGovernor::default().with_body_schema(schema);
        let err = governor.govern_value(json!({}), InputTarget::Body).unwrap_err();
        assert!(matches!(err, GovernanceError::SchemaViolation { target: InputTarget::Body, .. }));
    }

    #[tokio::test]
    async fn test_body_is_sanitized_and_replaced() {
        let request = json_request("/api/bookings", valid_booking().to_string());
        let governed = governor().govern(request).await.unwrap();

        let len: usize = governed.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_json(governed).await;
        assert_eq!(body["guest"]["name"], "&lt;b&gt;Ann&lt;&#x2F;b&gt;");
        assert_eq!(len, serde_json::to_vec(&body).unwrap().len());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_parsing() {
        let governor = InputGovernor::new(SanitizationOptions::default().with_max_body_bytes(100_000));
        // Not even JSON: size is checked first
        let request = json_request("/api/bookings", vec![b'x'; 150_000]);

        let err = governor.govern(request).await.unwrap_err();
        assert!(matches!(err, GovernanceError::PayloadTooLarge { limit: 100_000 }));
    }

    #[tokio::test]
    async fn test_declared_length_rejected_without_reading() {
        let governor = InputGovernor::new(SanitizationOptions::default().with_max_body_bytes(10));
        let mut request = json_request("/api/bookings", "{}");
        request
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(150_000usize));

        let err = governor.govern(request).await.unwrap_err();
        assert!(matches!(err, GovernanceError::PayloadTooLarge { limit: 10 }));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let err = governor()
            .govern(json_request("/api/bookings", "{\"room_id\": "))
            .await
            .unwrap_err();
        assert_eq!(err.to_body()["error"], "INVALID_REQUEST");
        assert_eq!(err.to_body()["message"], "Invalid JSON body");
    }

    #[tokio::test]
    async fn test_empty_body_with_schema_is_rejected() {
        let err = governor()
            .govern(json_request("/api/bookings", Body::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::SchemaViolation { target: InputTarget::Body, .. }));
    }

    #[tokio::test]
    async fn test_non_json_body_forwarded_untouched() {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("<b>raw</b>"))
            .unwrap();

        let governor = InputGovernor::default().with_query_schema(JsonSchema::<Listing>::new());
        let governed = governor.govern(request).await.unwrap();
        let bytes = governed.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"<b>raw</b>");
    }

    #[tokio::test]
    async fn test_non_json_body_rejected_when_schema_bound() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/bookings")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(valid_booking().to_string()))
            .unwrap();

        let err = governor().govern(request).await.unwrap_err();
        assert!(matches!(err, GovernanceError::MalformedInput(_)));
        assert_eq!(err.to_body()["message"], "Invalid request body");
    }

    #[tokio::test]
    async fn test_query_is_sanitized_and_validated() {
        let governor = InputGovernor::default().with_query_schema(JsonSchema::<Listing>::new());
        let request = Request::builder()
            .uri("/api/bookings?city=%3Cscript%3EOslo&page=2")
            .body(Body::empty())
            .unwrap();

        let governed = governor.govern(request).await.unwrap();
        assert_eq!(
            governed.uri().query(),
            Some("city=%26lt%3Bscript%26gt%3BOslo&page=2")
        );

        let request = Request::builder()
            .uri("/api/bookings?page=12345")
            .body(Body::empty())
            .unwrap();
        let err = governor.govern(request).await.unwrap_err();
        assert_eq!(err.to_body()["message"], "Invalid query parameters");
        assert_eq!(err.to_body()["errors"][0]["field"], "page");
    }

    #[test]
    fn test_json_content_types() {
        assert!(is_json_content_type(&HeaderValue::from_static("application/json")));
        assert!(is_json_content_type(&HeaderValue::from_static("application/json; charset=utf-8")));
        assert!(is_json_content_type(&HeaderValue::from_static("application/problem+json")));
        assert!(!is_json_content_type(&HeaderValue::from_static("multipart/form-data; boundary=x")));
    }
}
