//! WebSocket upgrade forwarding.
//!
//! # Responsibilities
//! - Forward the upgrade handshake with the WebSocket and token headers
//! - Return the upstream 101 response to the browser unmodified
//! - Splice the two upgraded connections together byte for byte
//!
//! # Data Flow
//! ```text
//! Browser ──upgrade──▶ Proxy ──upgrade──▶ Sandbox host
//! Browser ◀───101──── Proxy ◀───101──── Sandbox host
//! Browser ◀══ raw bytes (copy_bidirectional) ══▶ Sandbox host
//! ```
//!
//! # Design Decisions
//! - Handshake only; frames are never parsed or re-framed
//! - A non-101 answer is a rejection (e.g. bad token), reported with the
//!   upstream status and body

use axum::body::Body;
use axum::http::header::{
    CONNECTION, HOST, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, Version};
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::error::ProxyError;
use crate::http::request::UpstreamPlan;
use crate::http::response::from_upstream;
use crate::http::server::ProxyState;
use crate::observability::metrics;

/// Forward an upgrade request. On success the returned response is the
/// upstream's 101 and the connection splice runs in a background task.
pub async fn forward_upgrade(
    client: &reqwest::Client,
    state: &ProxyState,
    plan: &UpstreamPlan,
    mut request: Request<Body>,
    request_id: String,
) -> Result<Response, ProxyError> {
    let client_upgrade = hyper::upgrade::on(&mut request);
    let headers = handshake_headers(request.headers(), plan, state);

    let response = client
        .get(&plan.url)
        .version(Version::HTTP_11)
        .headers(headers)
        .send()
        .await
        .inspect_err(|_| metrics::record_upgrade("failed"))?;

    let status = response.status();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        metrics::record_upgrade("rejected");
        let body = rejection_body(response, &request_id).await;
        return Err(ProxyError::HandshakeRejected { status, body });
    }

    let headers = response.headers().clone();
    let upstream_io = response.upgrade().await.map_err(|e| {
        metrics::record_upgrade("failed");
        ProxyError::Upgrade(e.to_string())
    })?;
    metrics::record_upgrade("accepted");

    tracing::info!(
        request_id = %request_id,
        host = %plan.target.host,
        path = %plan.target.path,
        "WebSocket upgrade accepted by upstream"
    );
    tokio::spawn(splice(client_upgrade, upstream_io, request_id));

    Ok(from_upstream(StatusCode::SWITCHING_PROTOCOLS, headers, Body::empty()))
}

/// Body of a refused handshake. A body that cannot be read is logged and
/// replaced by an empty one so the upstream status still reaches the client.
async fn rejection_body(response: reqwest::Response, request_id: &str) -> String {
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                error = %e.without_url(),
                "Failed to read upgrade rejection body"
            );
            String::new()
        }
    }
}

/// Headers for the upstream handshake request.
fn handshake_headers(incoming: &HeaderMap, plan: &UpstreamPlan, state: &ProxyState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(host) = HeaderValue::from_str(&plan.target.host) {
        headers.insert(HOST, host);
    }
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    for name in [SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, SEC_WEBSOCKET_PROTOCOL] {
        if let Some(value) = incoming.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    plan.apply_token_headers(&mut headers, state);
    headers
}

async fn splice(client_upgrade: OnUpgrade, mut upstream: reqwest::Upgraded, request_id: String) {
    let upgraded = match client_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "Client connection was not upgraded"
            );
            return;
        }
    };
    let mut client = TokioIo::new(upgraded);

    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((to_upstream, to_client)) => tracing::debug!(
            request_id = %request_id,
            to_upstream,
            to_client,
            "WebSocket tunnel closed"
        ),
        Err(e) => tracing::debug!(
            request_id = %request_id,
            error = %e,
            "WebSocket tunnel ended with error"
        ),
    }
}
