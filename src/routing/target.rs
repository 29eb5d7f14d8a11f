//! Upstream target resolution.
//!
//! # Responsibilities
//! - Split the proxy path into `(host, path)`
//! - Recover the host from the calling page's `Referer` for bare
//!   sub-resource requests such as `/websockify`
//! - Reject hosts that are not plain `hostname[:port]`
//! - Build the upstream URL

use axum::http::uri::Authority;

use crate::error::ProxyError;
use crate::routing::matcher::Matcher;

/// Where a request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLocation {
    /// `hostname[:port]`, never with a scheme.
    pub host: String,
    /// Always starts with `/`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    /// True when the host came from the `Referer` header.
    pub from_referer: bool,
}

/// Split a path with its leading slash stripped into `(host, path)`.
///
/// `"h/a/b"` yields `("h", "/a/b")`; `"h"` yields `("h", "/")`.
pub fn split_target(stripped: &str) -> (&str, &str) {
    match stripped.find('/') {
        Some(idx) => (&stripped[..idx], &stripped[idx..]),
        None => (stripped, "/"),
    }
}

impl TargetLocation {
    /// Resolve the target for a request path.
    ///
    /// `stripped_path` is the request path without its leading slash and must
    /// not be empty (an empty path is the usage page, handled by the caller).
    pub fn resolve(
        stripped_path: &str,
        query: Option<&str>,
        referer: Option<&str>,
        matcher: &dyn Matcher,
    ) -> Self {
        let (host, path) = split_target(stripped_path);
        let query = query.filter(|q| !q.is_empty()).map(str::to_string);

        if !matcher.matches(host) {
            if let Some(referer_host) = referer.and_then(|r| referer_sandbox_host(r, matcher)) {
                return Self {
                    host: referer_host,
                    path: format!("/{stripped_path}"),
                    query,
                    from_referer: true,
                };
            }
        }

        Self {
            host: host.to_string(),
            path: path.to_string(),
            query,
            from_referer: false,
        }
    }

    /// Check that the host is a bare `hostname[:port]`.
    pub fn validate(&self) -> Result<(), ProxyError> {
        validate_host(&self.host)
    }

    /// Upstream URL for `scheme` with the given (already merged) query.
    pub fn upstream_url(&self, scheme: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{scheme}://{}{}?{q}", self.host, self.path),
            _ => format!("{scheme}://{}{}", self.host, self.path),
        }
    }
}

/// First path segment of the Referer, if it names a sandbox host.
fn referer_sandbox_host(referer: &str, matcher: &dyn Matcher) -> Option<String> {
    let url = url::Url::parse(referer).ok()?;
    let stripped = url.path().strip_prefix('/').unwrap_or(url.path());
    if stripped.is_empty() {
        return None;
    }
    let (host, _) = split_target(stripped);
    matcher.matches(host).then(|| host.to_string())
}

fn validate_host(host: &str) -> Result<(), ProxyError> {
    let invalid = || ProxyError::InvalidTarget(host.to_string());

    if host.is_empty() || host.contains('@') {
        return Err(invalid());
    }
    let authority: Authority = host.parse().map_err(|_| invalid())?;
    if authority.as_str().contains(':') && authority.port_u16().is_none() {
        // "https:" from a path like "/https://..." lands here.
        return Err(invalid());
    }

    let name = authority.host();
    let is_ipv6 = name.starts_with('[') && name.ends_with(']');
    let is_hostname = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_');
    if is_ipv6 || is_hostname {
        Ok(())
    } else {
        Err(invalid())
    }
}
