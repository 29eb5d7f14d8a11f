//! Request handling and classification.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) for every request
//! - Classify the request as preflight, upgrade or plain forward
//! - Resolve the upstream target and token into an [`UpstreamPlan`]
//!
//! # Design Decisions
//! - Classification is an explicit enum so each branch is testable alone
//! - Planning never fails on a bad Referer or a missing token; it only
//!   fails when the resolved host is not a usable hostname

use axum::http::header::{COOKIE, REFERER, UPGRADE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::routing::TargetLocation;
use crate::token::{resolve_token, with_token_query, AuthToken, TokenCarriers, TokenSource};
use crate::http::server::ProxyState;

/// Request ID header.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs for tower-http's request-id layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The request ID set by the request-id layer, or "unknown".
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Which branch of the proxy handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `OPTIONS`: answered locally with CORS headers.
    Preflight,
    /// `Upgrade: websocket`: handshake forwarded, socket spliced.
    Upgrade,
    /// Everything else: forwarded as plain HTTP.
    Forward,
}

impl RequestKind {
    pub fn classify(method: &Method, headers: &HeaderMap) -> Self {
        if method == Method::OPTIONS {
            return RequestKind::Preflight;
        }
        let is_websocket = headers
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
        if is_websocket {
            RequestKind::Upgrade
        } else {
            RequestKind::Forward
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Preflight => "preflight",
            RequestKind::Upgrade => "upgrade",
            RequestKind::Forward => "forward",
        }
    }
}

/// Everything needed to contact the sandbox host for one request.
#[derive(Debug, Clone)]
pub struct UpstreamPlan {
    pub target: TargetLocation,
    pub token: Option<AuthToken>,
    pub token_source: Option<TokenSource>,
    /// Outbound query, token merged in.
    pub query: Option<String>,
    /// Full upstream URL.
    pub url: String,
}

impl UpstreamPlan {
    /// Build the plan for a request. `Ok(None)` means the path is empty and
    /// the usage page should be served instead.
    pub fn from_parts(parts: &Parts, state: &ProxyState) -> Result<Option<Self>, ProxyError> {
        let path = parts.uri.path();
        let stripped = path.strip_prefix('/').unwrap_or(path);
        if stripped.is_empty() {
            return Ok(None);
        }

        let upstream = &state.config.upstream;
        let referer = parts.headers.get(REFERER).and_then(|v| v.to_str().ok());
        let query = parts.uri.query();

        let target = TargetLocation::resolve(stripped, query, referer, &state.matcher);
        target.validate()?;

        let cookies = joined_cookies(&parts.headers);
        let carriers = TokenCarriers {
            query,
            cookies: cookies.as_deref(),
            referer,
        };
        let resolved = resolve_token(
            &carriers,
            &target.host,
            &upstream.token_query_param,
            &upstream.token_cookie_prefix,
        );
        let (token, token_source) = match resolved {
            Some((token, source)) => (Some(token), Some(source)),
            None => (None, None),
        };

        let query = with_token_query(
            target.query.as_deref(),
            &upstream.token_query_param,
            token.as_ref(),
        );
        let url = target.upstream_url(&upstream.scheme, query.as_deref());

        Ok(Some(Self {
            target,
            token,
            token_source,
            query,
            url,
        }))
    }

    /// Add the token header and the interstitial bypass header.
    pub fn apply_token_headers(&self, headers: &mut HeaderMap, state: &ProxyState) {
        let upstream = &state.config.upstream;
        if let Ok(name) = HeaderName::from_bytes(upstream.bypass_header.as_bytes()) {
            headers.insert(name, HeaderValue::from_static("true"));
        }
        let Some(token) = &self.token else {
            return;
        };
        match (
            HeaderName::from_bytes(upstream.token_header.as_bytes()),
            HeaderValue::from_str(token.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(token = %token, "Token cannot be sent as a header value"),
        }
    }
}

/// All `Cookie` headers as one string. HTTP/2 clients send one per cookie.
fn joined_cookies(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use axum::body::Body;

    fn state() -> ProxyState {
        let mut config = ProxyConfig::default();
        config.upstream.sandbox_host_marker = "proxy.example.works".into();
        ProxyState::from_config(config)
    }

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap().into_parts().0
    }

    #[test]
    fn classifies_requests() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestKind::classify(&Method::OPTIONS, &headers), RequestKind::Preflight);
        assert_eq!(RequestKind::classify(&Method::GET, &headers), RequestKind::Forward);

        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert_eq!(RequestKind::classify(&Method::GET, &headers), RequestKind::Upgrade);

        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
        assert_eq!(RequestKind::classify(&Method::GET, &headers), RequestKind::Forward);
    }

    #[test]
    fn empty_path_means_usage() {
        assert!(UpstreamPlan::from_parts(&parts("/", &[]), &state()).unwrap().is_none());
    }

    #[test]
    fn plans_direct_request() {
        let plan = UpstreamPlan::from_parts(
            &parts("/6080-abc.proxy.example.works/vnc.html?token=XYZ", &[]),
            &state(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.url, "https://6080-abc.proxy.example.works/vnc.html?token=XYZ");
        assert_eq!(plan.token.as_ref().map(AuthToken::as_str), Some("XYZ"));
        assert_eq!(plan.token_source, Some(TokenSource::Query));
    }

    #[test]
    fn plans_websockify_from_referer() {
        let plan = UpstreamPlan::from_parts(
            &parts(
                "/websockify",
                &[("referer", "https://proxyhost/6080-abc.proxy.example.works/vnc.html?token=XYZ")],
            ),
            &state(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.target.host, "6080-abc.proxy.example.works");
        assert_eq!(plan.target.path, "/websockify");
        assert_eq!(plan.token.as_ref().map(AuthToken::as_str), Some("XYZ"));
        assert_eq!(plan.token_source, Some(TokenSource::Referer));
        assert_eq!(plan.url, "https://6080-abc.proxy.example.works/websockify?token=XYZ");
    }

    #[test]
    fn cookie_token_from_split_cookie_headers() {
        let plan = UpstreamPlan::from_parts(
            &parts(
                "/6080-abc.proxy.example.works/core/rfb.js",
                &[("cookie", "a=1"), ("cookie", "daytona_token_6080-abc=C")],
            ),
            &state(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.token_source, Some(TokenSource::Cookie));
        assert_eq!(plan.query.as_deref(), Some("token=C"));
    }

    #[test]
    fn rejects_scheme_in_host() {
        let request = parts("/https://evil.example/x", &[]);
        let err = UpstreamPlan::from_parts(&request, &state()).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidTarget(_)));
    }

    #[test]
    fn token_headers_only_with_token() {
        let state = state();
        let plan = UpstreamPlan::from_parts(&parts("/6080-abc.proxy.example.works/", &[]), &state)
            .unwrap()
            .unwrap();
        let mut headers = HeaderMap::new();
        plan.apply_token_headers(&mut headers, &state);
        assert_eq!(headers["x-daytona-skip-preview-warning"], "true");
        assert!(headers.get("x-daytona-preview-token").is_none());
    }
}
