//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Send the request upstream with a curated header set and the token headers
//! - Stream bodies through untouched, or buffer and rewrite textual bodies
//!   when a token is present
//!
//! # Design Decisions
//! - Only `User-Agent`, `Accept` and `Accept-Language` (plus `Content-Type`
//!   when a body is sent) are forwarded; browser cookies and auth stay here
//! - Bodies are only sent for methods other than GET and HEAD
//! - Rewriting buffers at most `rewrite.max_body_bytes`; larger bodies are
//!   re-emitted from the already-read prefix and streamed on

use axum::body::{Body, Bytes};
use axum::http::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use axum::response::Response;
use futures_util::{stream, StreamExt};

use crate::error::ProxyError;
use crate::http::request::UpstreamPlan;
use crate::http::response::from_upstream;
use crate::http::server::ProxyState;
use crate::observability::metrics;
use crate::security::strip_hop_by_hop;
use crate::token::rewrite::{ContentClass, TokenRewriter};

/// Forward a non-upgrade request and post-process the response.
pub async fn forward_http(
    client: &reqwest::Client,
    state: &ProxyState,
    plan: &UpstreamPlan,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let upstream = &state.config.upstream;

    let mut headers = HeaderMap::new();
    forward_or_default(&parts.headers, &mut headers, USER_AGENT, &upstream.default_user_agent);
    forward_or_default(&parts.headers, &mut headers, ACCEPT, &upstream.default_accept);
    forward_or_default(
        &parts.headers,
        &mut headers,
        ACCEPT_LANGUAGE,
        &upstream.default_accept_language,
    );
    plan.apply_token_headers(&mut headers, state);

    let mut builder = client.request(parts.method.clone(), &plan.url);
    if carries_body(&parts.method) {
        if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, content_type.clone());
        }
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let response = builder.headers(headers).send().await?;

    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let class = ContentClass::classify(content_type, &plan.target.path, &state.config.rewrite);

    let token = match &plan.token {
        Some(token) if should_rewrite(state, &parts.method, class, &headers) => token,
        _ => return Ok(passthrough(status, headers, response)),
    };
    let rewriter = TokenRewriter::new(&upstream.token_query_param, token);

    match read_capped(response, state.config.rewrite.max_body_bytes).await? {
        Buffered::Complete(bytes) => {
            let text = String::from_utf8(bytes).map_err(|e| {
                ProxyError::Rewrite(format!("{} body is not valid UTF-8: {e}", class.as_str()))
            })?;
            let rewritten = rewriter.rewrite(&text, class);

            headers.remove(CONTENT_LENGTH);
            metrics::record_rewrite(class.as_str());
            tracing::debug!(
                host = %plan.target.host,
                path = %plan.target.path,
                class = class.as_str(),
                "Rewrote response body"
            );
            Ok(from_upstream(status, headers, Body::from(rewritten)))
        }
        Buffered::Overflow(prefix, rest) => {
            tracing::debug!(
                host = %plan.target.host,
                path = %plan.target.path,
                limit = state.config.rewrite.max_body_bytes,
                "Body exceeds rewrite ceiling, streaming unmodified"
            );
            let head = stream::once(async move { Ok::<_, reqwest::Error>(Bytes::from(prefix)) });
            let body = Body::from_stream(head.chain(rest.bytes_stream()));
            Ok(from_upstream(status, headers, body))
        }
    }
}

fn forward_or_default(from: &HeaderMap, to: &mut HeaderMap, name: HeaderName, default: &str) {
    match from.get(&name) {
        Some(value) => {
            to.insert(name, value.clone());
        }
        None => {
            if let Ok(value) = HeaderValue::from_str(default) {
                to.insert(name, value);
            }
        }
    }
}

fn carries_body(method: &Method) -> bool {
    method != Method::GET && method != Method::HEAD
}

fn should_rewrite(
    state: &ProxyState,
    method: &Method,
    class: ContentClass,
    headers: &HeaderMap,
) -> bool {
    let rewrite = &state.config.rewrite;
    if !rewrite.enabled || !class.is_textual() || method == Method::HEAD {
        return false;
    }

    let encoded = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"));
    if encoded {
        return false;
    }

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    !matches!(declared, Some(len) if len > rewrite.max_body_bytes)
}

fn passthrough(
    status: axum::http::StatusCode,
    headers: HeaderMap,
    response: reqwest::Response,
) -> Response {
    from_upstream(status, headers, Body::from_stream(response.bytes_stream()))
}

enum Buffered {
    Complete(Vec<u8>),
    /// Bytes read so far and the response still holding the rest.
    Overflow(Vec<u8>, reqwest::Response),
}

async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Buffered, ProxyError> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        buf.extend_from_slice(&chunk);
        if buf.len() > limit {
            return Ok(Buffered::Overflow(buf, response));
        }
    }
    Ok(Buffered::Complete(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn state() -> ProxyState {
        let mut config = ProxyConfig::default();
        config.rewrite.max_body_bytes = 16;
        ProxyState::from_config(config)
    }

    #[test]
    fn body_only_for_non_get_head() {
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::HEAD));
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::DELETE));
    }

    #[test]
    fn rewrite_skipped_for_encoded_large_or_head() {
        let state = state();
        let mut headers = HeaderMap::new();
        assert!(should_rewrite(&state, &Method::GET, ContentClass::Html, &headers));
        assert!(!should_rewrite(&state, &Method::HEAD, ContentClass::Html, &headers));
        assert!(!should_rewrite(&state, &Method::GET, ContentClass::Other, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("17"));
        assert!(!should_rewrite(&state, &Method::GET, ContentClass::Js, &headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("16"));
        assert!(should_rewrite(&state, &Method::GET, ContentClass::Js, &headers));

        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(!should_rewrite(&state, &Method::GET, ContentClass::Js, &headers));
    }

    #[test]
    fn defaults_fill_missing_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert(ACCEPT, HeaderValue::from_static("text/html"));
        let mut outgoing = HeaderMap::new();
        forward_or_default(&incoming, &mut outgoing, ACCEPT, "*/*");
        forward_or_default(&incoming, &mut outgoing, USER_AGENT, "proxy-agent");

        assert_eq!(outgoing[ACCEPT], "text/html");
        assert_eq!(outgoing[USER_AGENT], "proxy-agent");
    }
}
