//! Header manipulation and security headers.
//!
//! # Responsibilities
//! - Answer CORS preflights
//! - Overlay CORS headers on every non-upgrade response
//! - Strip `X-Frame-Options` and `Content-Security-Policy` so the sandbox
//!   desktop can be framed by the dashboard
//! - Strip hop-by-hop headers from forwarded responses
//!
//! # Design Decisions
//! - A 101 response is never touched; its headers complete the handshake
//! - Values are parsed once per configuration, not per request

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::{CorsConfig, SecurityConfig};

/// Hop-by-hop headers that only describe a single connection.
const HOP_BY_HOP: [&str; 3] = ["keep-alive", "proxy-authenticate", "proxy-authorization"];

/// CORS and header stripping rules compiled from configuration.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    preflight_status: StatusCode,
    strip: Vec<HeaderName>,
}

impl HeaderPolicy {
    /// Compile the policy. Invalid values fall back to the permissive default
    /// with a warning; validation normally rejects them earlier.
    pub fn from_config(cors: &CorsConfig, security: &SecurityConfig) -> Self {
        let value = |name: &str, raw: &str, fallback: &'static str| {
            HeaderValue::from_str(raw).unwrap_or_else(|_| {
                tracing::warn!(
                    header = name,
                    value = raw,
                    "Invalid CORS header value, using default"
                );
                HeaderValue::from_static(fallback)
            })
        };

        let strip = security
            .strip_response_headers
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid header name in strip list");
                    None
                }
            })
            .collect();

        Self {
            allow_origin: value("access-control-allow-origin", &cors.allow_origin, "*"),
            allow_methods: value(
                "access-control-allow-methods",
                &cors.allow_methods,
                "GET, POST, PUT, DELETE, OPTIONS",
            ),
            allow_headers: value("access-control-allow-headers", &cors.allow_headers, "*"),
            preflight_status: StatusCode::from_u16(cors.preflight_status)
                .unwrap_or(StatusCode::NO_CONTENT),
            strip,
        }
    }

    /// Response to an `OPTIONS` preflight.
    pub fn preflight(&self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.preflight_status;
        self.apply_cors(response.headers_mut());
        response
    }

    /// Add or overwrite the CORS headers.
    pub fn apply_cors(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
    }

    /// Remove every header on the strip list.
    pub fn strip_security_headers(&self, headers: &mut HeaderMap) {
        for name in &self.strip {
            headers.remove(name);
        }
    }

    /// Last step before a response leaves the proxy. Upgrade responses pass
    /// through unmodified.
    pub fn finalize(&self, response: &mut Response) {
        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            return;
        }
        let headers = response.headers_mut();
        self.strip_security_headers(headers);
        self.apply_cors(headers);
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::from_config(&CorsConfig::default(), &SecurityConfig::default())
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("frame-ancestors 'none'"),
        );
        headers.insert("access-control-allow-origin", HeaderValue::from_static("https://sandbox"));
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers
    }

    #[test]
    fn finalize_strips_and_overlays() {
        let policy = HeaderPolicy::default();
        let mut response = Response::new(Body::empty());
        *response.headers_mut() = upstream_headers();
        policy.finalize(&mut response);

        let headers = response.headers();
        assert!(headers.get("x-frame-options").is_none());
        assert!(headers.get("content-security-policy").is_none());
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, POST, PUT, DELETE, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "*");
        assert_eq!(headers["content-type"], "text/html");
    }

    #[test]
    fn finalize_leaves_upgrade_untouched() {
        let policy = HeaderPolicy::default();
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        *response.headers_mut() = upstream_headers();
        policy.finalize(&mut response);

        assert_eq!(response.headers(), &upstream_headers());
    }

    #[test]
    fn preflight_has_cors_and_no_body() {
        let response = HeaderPolicy::default().preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[test]
    fn preflight_status_is_configurable() {
        let cors = CorsConfig {
            preflight_status: 200,
            ..CorsConfig::default()
        };
        let policy = HeaderPolicy::from_config(&cors, &SecurityConfig::default());
        assert_eq!(policy.preflight().status(), StatusCode::OK);
    }

    #[test]
    fn hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("text/css"));
        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["content-type"], "text/css");
    }
}
