//! Client fingerprinting for quota grouping.
//!
//! The identifier is `ip:` followed by the first ten characters of the
//! base64-encoded user agent. It is a coarse grouping key, not an identity.

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::net::SocketAddr;

/// Proxy headers consulted for the client IP, in precedence order.
const IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// IP placeholder when no source yields an address.
pub const UNKNOWN_IP: &str = "unknown";

const USER_AGENT_PREFIX_LEN: usize = 10;

/// Derived per-client fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentifier(String);

impl ClientIdentifier {
    /// Derive the identifier from request headers and the transport peer.
    #[must_use]
    pub fn derive(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let ip = resolve_client_ip(headers, peer);
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let encoded = STANDARD.encode(user_agent.as_bytes());
        let prefix: String = encoded.chars().take(USER_AGENT_PREFIX_LEN).collect();

        Self(format!("{ip}:{prefix}"))
    }

    /// Derive the identifier from request parts, using `ConnectInfo` when present.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::derive(&parts.headers, peer)
    }

    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the identifier string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the client IP from proxy headers, then the peer address.
#[must_use]
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in IP_HEADERS {
        let candidate = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            // X-Forwarded-For lists hops; the first one is the client
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(ip) = candidate {
            return ip.to_string();
        }
    }

    peer.map_or_else(|| UNKNOWN_IP.to_string(), |addr| addr.ip().to_string())
}
