//! Response construction.
//!
//! # Responsibilities
//! - Serve the usage page for an empty path
//! - Rebuild forwarded responses from upstream parts
//!
//! CORS and header stripping happen afterwards, in
//! [`HeaderPolicy::finalize`](crate::security::HeaderPolicy::finalize).

use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

/// Body of the usage page.
pub const USAGE: &str = "VNC Proxy - Usage: /{sandbox-host}/{path}";

/// 200 text/plain usage page.
pub fn usage() -> Response {
    let mut response = Response::new(Body::from(USAGE));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Response with the given upstream status, headers and body.
pub fn from_upstream(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
