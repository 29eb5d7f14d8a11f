//! Request-scoped error taxonomy.
//!
//! Every failure is resolved at the request boundary into a same-origin HTTP
//! response; nothing here is ever allowed to drop the client connection.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The resolved host is not a bare `hostname[:port]`.
    #[error("invalid target host {0:?}")]
    InvalidTarget(String),

    /// DNS, connect, TLS, reset or timeout while talking to the sandbox host.
    ///
    /// Holds the error without its URL; the upstream query carries the token.
    #[error("Proxy error: {0}")]
    Upstream(reqwest::Error),

    /// The sandbox host answered an upgrade request with something other than 101.
    #[error("WebSocket upgrade rejected with status {status}")]
    HandshakeRejected { status: StatusCode, body: String },

    /// The sandbox host accepted the upgrade but the stream could not be taken over.
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    /// A textual body could not be decoded for token injection.
    #[error("Rewrite error: {0}")]
    Rewrite(String),

    /// The incoming request body could not be read.
    #[error("Request body error: {0}")]
    Body(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Upstream(err.without_url())
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::HandshakeRejected { status, .. } => *status,
            ProxyError::Upstream(_)
            | ProxyError::Upgrade(_)
            | ProxyError::Rewrite(_)
            | ProxyError::Body(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ProxyError::HandshakeRejected { body, .. } => body,
            other => other.to_string(),
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}
