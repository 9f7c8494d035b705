//! Security headers and CORS.
//!
//! A [`SecurityPolicy`] is declarative and serde friendly. It is compiled
//! once into a [`SecurityHeaderGuard`] holding ready-made header values, so
//! the request path only copies headers and matches the `Origin`.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use portal_telemetry::GovernanceMetrics;

use crate::config::Environment;
use crate::error::{GovernanceError, Result};

static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
static X_DNS_PREFETCH_CONTROL: HeaderName = HeaderName::from_static("x-dns-prefetch-control");
static X_DOWNLOAD_OPTIONS: HeaderName = HeaderName::from_static("x-download-options");
static X_PERMITTED_CROSS_DOMAIN_POLICIES: HeaderName =
    HeaderName::from_static("x-permitted-cross-domain-policies");

/// Allowed CORS origin setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// `true` allows any origin (`*`), `false` omits the header.
    Bool(bool),
    /// A single origin, always echoed.
    Single(String),
    /// Origins echoed back only when the request's `Origin` is listed.
    List(Vec<String>),
}

impl Default for CorsOrigin {
    fn default() -> Self {
        Self::Bool(false)
    }
}

/// CORS settings of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorsPolicy {
    /// Allowed origin(s).
    #[serde(default)]
    pub origin: CorsOrigin,

    /// Allowed methods.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Allowed request headers.
    #[serde(default)]
    pub allowed_headers: Vec<String>,

    /// Whether credentials are allowed.
    #[serde(default)]
    pub credentials: bool,

    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age: Option<u64>,
}

impl CorsPolicy {
    /// Echo the request origin when it is one of `origins`.
    #[must_use]
    pub fn allow_list(origins: Vec<String>) -> Self {
        Self {
            origin: CorsOrigin::List(origins),
            ..Self::default()
        }
    }

    /// Set allowed methods.
    #[must_use]
    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| (*m).to_string()).collect();
        self
    }

    /// Set allowed request headers.
    #[must_use]
    pub fn with_allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|h| (*h).to_string()).collect();
        self
    }

    /// Allow credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the preflight cache lifetime.
    #[must_use]
    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }
}

/// Strict-Transport-Security parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HstsPolicy {
    /// Max age in seconds.
    #[serde(default = "default_hsts_max_age")]
    pub max_age: u64,

    /// Include subdomains.
    #[serde(default = "default_true")]
    pub include_subdomains: bool,

    /// Request preload list inclusion.
    #[serde(default)]
    pub preload: bool,
}

fn default_hsts_max_age() -> u64 {
    31_536_000 // 1 year
}

fn default_true() -> bool {
    true
}

impl Default for HstsPolicy {
    fn default() -> Self {
        Self {
            max_age: default_hsts_max_age(),
            include_subdomains: true,
            preload: true,
        }
    }
}

impl HstsPolicy {
    /// Header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut value = format!("max-age={}", self.max_age);
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }
}

/// Declarative header policy for one class of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Policy name, used in logs.
    pub name: String,

    /// CSP directives in order. Names may be attribute style (`defaultSrc`)
    /// or hyphenated (`default-src`).
    #[serde(default)]
    pub content_security_policy: Vec<(String, Vec<String>)>,

    /// CORS settings.
    #[serde(default)]
    pub cors: CorsPolicy,

    /// X-Frame-Options value.
    #[serde(default)]
    pub frame_options: Option<String>,

    /// Emit `X-Content-Type-Options: nosniff`.
    #[serde(default = "default_true")]
    pub nosniff: bool,

    /// Referrer-Policy value.
    #[serde(default)]
    pub referrer_policy: Option<String>,

    /// Permissions-Policy value.
    #[serde(default)]
    pub permissions_policy: Option<String>,

    /// HSTS parameters. Ignored outside production-like environments.
    #[serde(default)]
    pub hsts: Option<HstsPolicy>,

    /// Strip the `Server` header from responses.
    #[serde(default = "default_true")]
    pub remove_server_header: bool,
}

impl SecurityPolicy {
    /// Baseline policy for pages and general endpoints.
    #[must_use]
    pub fn default_policy(origins: Vec<String>) -> Self {
        Self {
            name: "default".to_string(),
            content_security_policy: CspBuilder::new()
                .default_src(&["'self'"])
                .script_src(&["'self'"])
                .style_src(&["'self'", "'unsafe-inline'"])
                .img_src(&["'self'", "data:", "https:"])
                .font_src(&["'self'"])
                .connect_src(&["'self'"])
                .object_src(&["'none'"])
                .frame_ancestors(&["'none'"])
                .base_uri(&["'self'"])
                .form_action(&["'self'"])
                .into_directives(),
            cors: CorsPolicy::allow_list(origins)
                .with_methods(&["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .with_allowed_headers(&["Content-Type", "Authorization", "X-Requested-With"])
                .with_credentials(true)
                .with_max_age(86_400),
            frame_options: Some("DENY".to_string()),
            nosniff: true,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            permissions_policy: Some("camera=(), microphone=(), geolocation=()".to_string()),
            hsts: Some(HstsPolicy::default()),
            remove_server_header: true,
        }
    }

    /// Login, registration and password reset.
    #[must_use]
    pub fn auth(origins: Vec<String>) -> Self {
        Self {
            name: "auth".to_string(),
            content_security_policy: CspBuilder::new()
                .default_src(&["'self'"])
                .script_src(&["'self'"])
                .object_src(&["'none'"])
                .frame_ancestors(&["'none'"])
                .form_action(&["'self'"])
                .into_directives(),
            cors: CorsPolicy::allow_list(origins)
                .with_methods(&["POST", "OPTIONS"])
                .with_allowed_headers(&["Content-Type", "X-Requested-With"])
                .with_credentials(true)
                .with_max_age(600),
            referrer_policy: Some("no-referrer".to_string()),
            ..Self::default_policy(Vec::new())
        }
    }

    /// Payment intents and confirmations.
    #[must_use]
    pub fn payment(origins: Vec<String>) -> Self {
        Self {
            name: "payment".to_string(),
            content_security_policy: CspBuilder::new()
                .default_src(&["'self'"])
                .script_src(&["'self'", "https://js.stripe.com"])
                .frame_src(&["https://js.stripe.com", "https://hooks.stripe.com"])
                .connect_src(&["'self'", "https://api.stripe.com"])
                .object_src(&["'none'"])
                .frame_ancestors(&["'none'"])
                .into_directives(),
            cors: CorsPolicy::allow_list(origins)
                .with_methods(&["GET", "POST", "OPTIONS"])
                .with_allowed_headers(&["Content-Type", "Authorization"])
                .with_credentials(true)
                .with_max_age(600),
            permissions_policy: Some(
                "camera=(), microphone=(), geolocation=(), payment=(self)".to_string(),
            ),
            ..Self::default_policy(Vec::new())
        }
    }

    /// JSON API consumed by first-party clients.
    #[must_use]
    pub fn api(origins: Vec<String>) -> Self {
        Self {
            name: "api".to_string(),
            content_security_policy: CspBuilder::new()
                .default_src(&["'none'"])
                .frame_ancestors(&["'none'"])
                .into_directives(),
            cors: CorsPolicy::allow_list(origins)
                .with_methods(&["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .with_allowed_headers(&["Content-Type", "Authorization", "X-Requested-With"])
                .with_credentials(true)
                .with_max_age(3_600),
            referrer_policy: Some("no-referrer".to_string()),
            ..Self::default_policy(Vec::new())
        }
    }

    /// Replace the CORS settings.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = cors;
        self
    }

    /// Replace the CSP directives.
    #[must_use]
    pub fn with_csp(mut self, csp: CspBuilder) -> Self {
        self.content_security_policy = csp.into_directives();
        self
    }

    /// Composed Content-Security-Policy value.
    #[must_use]
    pub fn csp_header(&self) -> String {
        compose_csp(&self.content_security_policy)
    }
}

/// Convert an attribute-style directive name to its hyphenated form.
#[must_use]
pub fn directive_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Compose a Content-Security-Policy value from ordered directives.
#[must_use]
pub fn compose_csp(directives: &[(String, Vec<String>)]) -> String {
    directives
        .iter()
        .map(|(name, sources)| {
            let name = directive_name(name);
            if sources.is_empty() {
                name
            } else {
                format!("{name} {}", sources.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build Content-Security-Policy directives.
#[derive(Debug, Default, Clone)]
pub struct CspBuilder {
    directives: Vec<(String, Vec<String>)>,
}

impl CspBuilder {
    /// Create a new CSP builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add any directive.
    #[must_use]
    pub fn directive(mut self, name: &str, sources: &[&str]) -> Self {
        self.directives.push((
            directive_name(name),
            sources.iter().map(|s| (*s).to_string()).collect(),
        ));
        self
    }

    /// Add default-src directive.
    #[must_use]
    pub fn default_src(self, sources: &[&str]) -> Self {
        self.directive("default-src", sources)
    }

    /// Add script-src directive.
    #[must_use]
    pub fn script_src(self, sources: &[&str]) -> Self {
        self.directive("script-src", sources)
    }

    /// Add style-src directive.
    #[must_use]
    pub fn style_src(self, sources: &[&str]) -> Self {
        self.directive("style-src", sources)
    }

    /// Add img-src directive.
    #[must_use]
    pub fn img_src(self, sources: &[&str]) -> Self {
        self.directive("img-src", sources)
    }

    /// Add connect-src directive.
    #[must_use]
    pub fn connect_src(self, sources: &[&str]) -> Self {
        self.directive("connect-src", sources)
    }

    /// Add font-src directive.
    #[must_use]
    pub fn font_src(self, sources: &[&str]) -> Self {
        self.directive("font-src", sources)
    }

    /// Add frame-src directive.
    #[must_use]
    pub fn frame_src(self, sources: &[&str]) -> Self {
        self.directive("frame-src", sources)
    }

    /// Add frame-ancestors directive.
    #[must_use]
    pub fn frame_ancestors(self, sources: &[&str]) -> Self {
        self.directive("frame-ancestors", sources)
    }

    /// Add form-action directive.
    #[must_use]
    pub fn form_action(self, sources: &[&str]) -> Self {
        self.directive("form-action", sources)
    }

    /// Add base-uri directive.
    #[must_use]
    pub fn base_uri(self, sources: &[&str]) -> Self {
        self.directive("base-uri", sources)
    }

    /// Add object-src directive.
    #[must_use]
    pub fn object_src(self, sources: &[&str]) -> Self {
        self.directive("object-src", sources)
    }

    /// Add upgrade-insecure-requests directive.
    #[must_use]
    pub fn upgrade_insecure_requests(self) -> Self {
        self.directive("upgrade-insecure-requests", &[])
    }

    /// Directives in insertion order.
    #[must_use]
    pub fn into_directives(self) -> Vec<(String, Vec<String>)> {
        self.directives
    }

    /// Build the CSP header value.
    #[must_use]
    pub fn build(self) -> String {
        compose_csp(&self.directives)
    }
}

/// The named policies, selected per route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicies {
    /// General endpoints.
    pub default: SecurityPolicy,
    /// Credential endpoints.
    pub auth: SecurityPolicy,
    /// Payment endpoints.
    pub payment: SecurityPolicy,
    /// JSON API endpoints.
    pub api: SecurityPolicy,
}

impl SecurityPolicies {
    /// Build every named policy for `environment`, allowing `origins`.
    ///
    /// Development falls back to local front-end origins when `origins` is
    /// empty. HSTS is dropped outside production-like environments.
    #[must_use]
    pub fn for_environment(environment: Environment, origins: Vec<String>) -> Self {
        let origins = if origins.is_empty() && !environment.is_production_like() {
            vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ]
        } else {
            origins
        };

        let mut policies = Self {
            default: SecurityPolicy::default_policy(origins.clone()),
            auth: SecurityPolicy::auth(origins.clone()),
            payment: SecurityPolicy::payment(origins.clone()),
            api: SecurityPolicy::api(origins),
        };

        if !environment.is_production_like() {
            for policy in [
                &mut policies.default,
                &mut policies.auth,
                &mut policies.payment,
                &mut policies.api,
            ] {
                policy.hsts = None;
            }
        }
        policies
    }

    /// Look up a policy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecurityPolicy> {
        match name {
            "default" => Some(&self.default),
            "auth" => Some(&self.auth),
            "payment" => Some(&self.payment),
            "api" => Some(&self.api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum CompiledOrigin {
    Any,
    Disabled,
    Fixed(HeaderValue),
    List(Vec<String>),
}

/// A policy compiled into header values, ready to stamp onto responses.
#[derive(Debug, Clone)]
pub struct SecurityHeaderGuard {
    name: Arc<str>,
    fixed: Arc<[(HeaderName, HeaderValue)]>,
    origin: CompiledOrigin,
    cors: Arc<[(HeaderName, HeaderValue)]>,
    remove_server_header: bool,
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| GovernanceError::config(format!("invalid {field} header value: {value:?}")))
}

impl SecurityHeaderGuard {
    /// Compile `policy` for `environment`.
    pub fn compile(policy: &SecurityPolicy, environment: Environment) -> Result<Self> {
        let mut fixed = Vec::new();

        if !policy.content_security_policy.is_empty() {
            fixed.push((
                header::CONTENT_SECURITY_POLICY,
                header_value("Content-Security-Policy", &policy.csp_header())?,
            ));
        }
        if let Some(frame) = &policy.frame_options {
            fixed.push((header::X_FRAME_OPTIONS, header_value("X-Frame-Options", frame)?));
        }
        if policy.nosniff {
            fixed.push((header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")));
        }
        if let Some(referrer) = &policy.referrer_policy {
            fixed.push((header::REFERRER_POLICY, header_value("Referrer-Policy", referrer)?));
        }
        if let Some(permissions) = &policy.permissions_policy {
            fixed.push((
                PERMISSIONS_POLICY.clone(),
                header_value("Permissions-Policy", permissions)?,
            ));
        }
        if let Some(hsts) = policy.hsts.as_ref().filter(|_| environment.is_production_like()) {
            fixed.push((
                header::STRICT_TRANSPORT_SECURITY,
                header_value("Strict-Transport-Security", &hsts.header_value())?,
            ));
        }

        // Always on
        fixed.push((X_DNS_PREFETCH_CONTROL.clone(), HeaderValue::from_static("off")));
        fixed.push((X_DOWNLOAD_OPTIONS.clone(), HeaderValue::from_static("noopen")));
        fixed.push((
            X_PERMITTED_CROSS_DOMAIN_POLICIES.clone(),
            HeaderValue::from_static("none"),
        ));
        fixed.push((header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")));

        let origin = match &policy.cors.origin {
            CorsOrigin::Bool(true) => CompiledOrigin::Any,
            CorsOrigin::Bool(false) => CompiledOrigin::Disabled,
            CorsOrigin::Single(origin) => {
                CompiledOrigin::Fixed(header_value("Access-Control-Allow-Origin", origin)?)
            }
            CorsOrigin::List(origins) => CompiledOrigin::List(origins.clone()),
        };

        let mut cors = Vec::new();
        if !policy.cors.methods.is_empty() {
            cors.push((
                header::ACCESS_CONTROL_ALLOW_METHODS,
                header_value("Access-Control-Allow-Methods", &policy.cors.methods.join(", "))?,
            ));
        }
        if !policy.cors.allowed_headers.is_empty() {
            cors.push((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                header_value(
                    "Access-Control-Allow-Headers",
                    &policy.cors.allowed_headers.join(", "),
                )?,
            ));
        }
        if policy.cors.credentials {
            cors.push((
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            ));
        }
        if let Some(max_age) = policy.cors.max_age {
            cors.push((header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age)));
        }

        Ok(Self {
            name: Arc::from(policy.name.as_str()),
            fixed: fixed.into(),
            origin,
            cors: cors.into(),
            remove_server_header: policy.remove_server_header,
        })
    }

    /// Policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request is a CORS preflight.
    #[must_use]
    pub fn is_preflight(method: &Method) -> bool {
        method == Method::OPTIONS
    }

    /// Negotiate `Access-Control-Allow-Origin` for a request `Origin`.
    #[must_use]
    pub fn allow_origin(&self, request_origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match &self.origin {
            CompiledOrigin::Any => Some(HeaderValue::from_static("*")),
            CompiledOrigin::Disabled => None,
            CompiledOrigin::Fixed(origin) => Some(origin.clone()),
            CompiledOrigin::List(allowed) => {
                let origin = request_origin?;
                let origin_str = origin.to_str().ok()?;
                allowed
                    .iter()
                    .any(|candidate| candidate == origin_str)
                    .then(|| origin.clone())
            }
        }
    }

    /// Write the policy headers and negotiated CORS headers onto a response.
    pub fn apply(&self, request_headers: &HeaderMap, response_headers: &mut HeaderMap) {
        for (name, value) in self.fixed.iter() {
            response_headers.insert(name.clone(), value.clone());
        }

        if let Some(origin) = self.allow_origin(request_headers.get(header::ORIGIN)) {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        if matches!(self.origin, CompiledOrigin::List(_)) {
            response_headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
        for (name, value) in self.cors.iter() {
            response_headers.insert(name.clone(), value.clone());
        }

        if self.remove_server_header {
            response_headers.remove(header::SERVER);
        }
    }

    /// Empty 200 answer to a preflight, carrying the full header set.
    #[must_use]
    pub fn preflight_response<B: Default>(&self, request_headers: &HeaderMap) -> Response<B> {
        debug!(policy = %self.name, "Answering CORS preflight");

        let mut response = Response::new(B::default());
        *response.status_mut() = StatusCode::OK;
        self.apply(request_headers, response.headers_mut());
        response
    }
}

/// Layer that applies only a security header policy.
#[derive(Debug, Clone)]
pub struct SecurityHeadersLayer {
    guard: SecurityHeaderGuard,
    metrics: Option<GovernanceMetrics>,
}

impl SecurityHeadersLayer {
    /// Create a new security headers layer.
    #[must_use]
    pub fn new(guard: SecurityHeaderGuard) -> Self {
        Self {
            guard,
            metrics: None,
        }
    }

    /// Count preflights in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: GovernanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeaders {
            inner,
            guard: self.guard.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Security headers service.
#[derive(Debug, Clone)]
pub struct SecurityHeaders<S> {
    inner: S,
    guard: SecurityHeaderGuard,
    metrics: Option<GovernanceMetrics>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecurityHeaders<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let guard = self.guard.clone();

        if SecurityHeaderGuard::is_preflight(request.method()) {
            if let Some(metrics) = &self.metrics {
                metrics.record_preflight();
            }
            let response = guard.preflight_response(request.headers());
            return Box::pin(async move { Ok(response) });
        }

        let request_headers = request.headers().clone();
        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = future.await?;
            guard.apply(&request_headers, response.headers_mut());
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = "https://shop.example.com";

    fn origins() -> Vec<String> {
        vec![SHOP.to_string(), "https://admin.example.com".to_string()]
    }

    fn request_with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers
    }

    fn compiled(policy: &SecurityPolicy) -> SecurityHeaderGuard {
        SecurityHeaderGuard::compile(policy, Environment::Production).unwrap()
    }

    #[test]
    fn test_directive_name_conversion() {
        assert_eq!(directive_name("defaultSrc"), "default-src");
        assert_eq!(directive_name("upgradeInsecureRequests"), "upgrade-insecure-requests");
        assert_eq!(directive_name("frame-ancestors"), "frame-ancestors");
    }

    #[test]
    fn test_compose_csp() {
        let directives = vec![
            ("defaultSrc".to_string(), vec!["'self'".to_string()]),
            (
                "imgSrc".to_string(),
                vec!["'self'".to_string(), "data:".to_string()],
            ),
            ("upgradeInsecureRequests".to_string(), Vec::new()),
        ];
        assert_eq!(
            compose_csp(&directives),
            "default-src 'self'; img-src 'self' data:; upgrade-insecure-requests"
        );
    }

    #[test]
    fn test_csp_builder() {
        let csp = CspBuilder::new()
            .default_src(&["'none'"])
            .directive("frameAncestors", &["'none'"])
            .build();
        assert_eq!(csp, "default-src 'none'; frame-ancestors 'none'");
    }

    #[test]
    fn test_listed_origin_is_echoed() {
        let guard = compiled(&SecurityPolicy::default_policy(origins()));
        let mut response = HeaderMap::new();
        guard.apply(&request_with_origin(SHOP), &mut response);

        assert_eq!(response[header::ACCESS_CONTROL_ALLOW_ORIGIN], SHOP);
        assert_eq!(response[header::VARY], "Origin");
        assert_eq!(response[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_unlisted_origin_is_not_echoed() {
        let guard = compiled(&SecurityPolicy::default_policy(origins()));
        let mut response = HeaderMap::new();
        guard.apply(&request_with_origin("https://evil.example.net"), &mut response);

        assert!(response.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        // The rest of the policy still applies
        assert_eq!(response[header::X_FRAME_OPTIONS], "DENY");
    }

    #[test]
    fn test_origin_prefix_does_not_match() {
        let guard = compiled(&SecurityPolicy::default_policy(origins()));
        let mut response = HeaderMap::new();
        guard.apply(
            &request_with_origin("https://shop.example.com.evil.net"),
            &mut response,
        );
        assert!(response.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_bool_and_single_origins() {
        let any = SecurityPolicy::api(Vec::new()).with_cors(CorsPolicy {
            origin: CorsOrigin::Bool(true),
            ..CorsPolicy::default()
        });
        let mut response = HeaderMap::new();
        compiled(&any).apply(&HeaderMap::new(), &mut response);
        assert_eq!(response[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.get(header::ACCESS_CONTROL_ALLOW_METHODS).is_none());

        let off = SecurityPolicy::api(Vec::new()).with_cors(CorsPolicy::default());
        let mut response = HeaderMap::new();
        compiled(&off).apply(&request_with_origin(SHOP), &mut response);
        assert!(response.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let single = SecurityPolicy::api(Vec::new()).with_cors(CorsPolicy {
            origin: CorsOrigin::Single(SHOP.to_string()),
            ..CorsPolicy::default()
        });
        let mut response = HeaderMap::new();
        compiled(&single).apply(&request_with_origin("https://other.example"), &mut response);
        assert_eq!(response[header::ACCESS_CONTROL_ALLOW_ORIGIN], SHOP);
    }

    #[test]
    fn test_always_on_headers() {
        let guard = compiled(&SecurityPolicy::api(origins()));
        let mut response = HeaderMap::new();
        response.insert(header::SERVER, HeaderValue::from_static("hyper"));
        guard.apply(&HeaderMap::new(), &mut response);

        assert_eq!(response[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(response["x-dns-prefetch-control"], "off");
        assert_eq!(response["x-download-options"], "noopen");
        assert_eq!(response["x-permitted-cross-domain-policies"], "none");
        assert_eq!(response[header::X_XSS_PROTECTION], "1; mode=block");
        assert_eq!(
            response[header::CONTENT_SECURITY_POLICY],
            "default-src 'none'; frame-ancestors 'none'"
        );
        assert!(response.get(header::SERVER).is_none());
    }

    #[test]
    fn test_hsts_only_in_production_like() {
        let policy = SecurityPolicy::default_policy(origins());

        let mut response = HeaderMap::new();
        SecurityHeaderGuard::compile(&policy, Environment::Development)
            .unwrap()
            .apply(&HeaderMap::new(), &mut response);
        assert!(response.get(header::STRICT_TRANSPORT_SECURITY).is_none());

        let mut response = HeaderMap::new();
        SecurityHeaderGuard::compile(&policy, Environment::Staging)
            .unwrap()
            .apply(&HeaderMap::new(), &mut response);
        assert_eq!(
            response[header::STRICT_TRANSPORT_SECURITY],
            "max-age=31536000; includeSubDomains; preload"
        );
    }

    #[test]
    fn test_invalid_header_value_fails_compile() {
        let mut policy = SecurityPolicy::default_policy(origins());
        policy.frame_options = Some("DENY\n".to_string());
        assert!(SecurityHeaderGuard::compile(&policy, Environment::Production).is_err());
    }

    #[test]
    fn test_preflight_response() {
        let guard = compiled(&SecurityPolicy::auth(origins()));
        let response: Response<String> = guard.preflight_response(&request_with_origin(SHOP));

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], SHOP);
    }

    #[test]
    fn test_policies_for_environment() {
        let dev = SecurityPolicies::for_environment(Environment::Development, Vec::new());
        assert_eq!(
            dev.default.cors.origin,
            CorsOrigin::List(vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string()
            ])
        );
        assert!(dev.auth.hsts.is_none());

        let prod = SecurityPolicies::for_environment(Environment::Production, origins());
        assert!(prod.payment.hsts.is_some());
        assert_eq!(prod.get("payment").map(|p| p.name.as_str()), Some("payment"));
        assert!(prod.get("admin").is_none());
    }

    #[test]
    fn test_cors_origin_deserialization() {
        let any: CorsOrigin = serde_json::from_str("true").unwrap();
        assert_eq!(any, CorsOrigin::Bool(true));
        let single: CorsOrigin = serde_json::from_str(r#""https://a.example""#).unwrap();
        assert_eq!(single, CorsOrigin::Single("https://a.example".to_string()));
        let list: CorsOrigin = serde_json::from_str(r#"["https://a.example"]"#).unwrap();
        assert_eq!(list, CorsOrigin::List(vec!["https://a.example".to_string()]));
    }
}
