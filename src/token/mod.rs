//! Preview token propagation.
//!
//! # Responsibilities
//! - Resolve one token per request from the query, a per-host cookie, or the
//!   Referer's query (first non-empty wins, in that order)
//! - Append the token to the outbound query when it is not already there
//! - Keep the token out of logs (only a short prefix is ever printed)
//!
//! The body rewriting half lives in [`rewrite`].

pub mod rewrite;

use std::fmt;

use url::form_urlencoded;

/// Characters of a token shown in logs.
const VISIBLE_PREFIX: usize = 4;

/// An opaque, non-empty preview token.
///
/// `Display` and `Debug` both print a redacted prefix; use [`AuthToken::as_str`]
/// to get the value for the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token value. Empty and whitespace-only values are not tokens.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form-urlencoded value, ready to follow `token=`.
    pub fn encoded(&self) -> String {
        form_urlencoded::byte_serialize(self.0.as_bytes()).collect()
    }

    /// Short prefix for logging. Never more than half of the token.
    pub fn redacted(&self) -> String {
        let visible = (self.0.chars().count() / 2).min(VISIBLE_PREFIX);
        let prefix: String = self.0.chars().take(visible).collect();
        format!("{prefix}…")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken({})", self.redacted())
    }
}

/// Where the token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Query,
    Cookie,
    Referer,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Query => "query",
            TokenSource::Cookie => "cookie",
            TokenSource::Referer => "referer",
        }
    }
}

/// The carriers a token may arrive on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCarriers<'a> {
    /// Raw incoming query string (no leading `?`).
    pub query: Option<&'a str>,
    /// All `Cookie` header values joined with `"; "`.
    pub cookies: Option<&'a str>,
    /// Raw `Referer` header.
    pub referer: Option<&'a str>,
}

/// Resolve the token for a request targeting `host`.
///
/// `param` is the query parameter name and `cookie_prefix` the cookie name
/// prefix; the cookie name is `cookie_prefix` followed by the first DNS
/// label of `host`.
pub fn resolve_token(
    carriers: &TokenCarriers<'_>,
    host: &str,
    param: &str,
    cookie_prefix: &str,
) -> Option<(AuthToken, TokenSource)> {
    if let Some(token) = carriers.query.and_then(|q| query_param(q, param)) {
        return Some((token, TokenSource::Query));
    }

    let cookie_name = format!("{cookie_prefix}{}", first_label(host));
    if let Some(token) = carriers.cookies.and_then(|c| cookie_value(c, &cookie_name)) {
        return Some((token, TokenSource::Cookie));
    }

    carriers
        .referer
        .and_then(|r| url::Url::parse(r).ok())
        .and_then(|url| url.query().and_then(|q| query_param(q, param)))
        .map(|token| (token, TokenSource::Referer))
}

/// Merge the token into an outbound query string.
///
/// The query is returned unchanged when there is no token or when it already
/// carries `param`. An empty result is `None`.
pub fn with_token_query(
    query: Option<&str>,
    param: &str,
    token: Option<&AuthToken>,
) -> Option<String> {
    let query = query.filter(|q| !q.is_empty());

    let Some(token) = token else {
        return query.map(str::to_string);
    };

    match query {
        Some(q) if has_param(q, param) => Some(q.to_string()),
        Some(q) => Some(format!("{q}&{param}={}", token.encoded())),
        None => Some(format!("{param}={}", token.encoded())),
    }
}

/// True if the query string has a `param` key, with or without a value.
pub fn has_param(query: &str, param: &str) -> bool {
    form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == param)
}

fn query_param(query: &str, param: &str) -> Option<AuthToken> {
    form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == param)
        .find_map(|(_, value)| AuthToken::new(value.into_owned()))
}

fn cookie_value(cookies: &str, name: &str) -> Option<AuthToken> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(key, _)| key.trim() == name)
        .find_map(|(_, value)| AuthToken::new(value.trim().trim_matches('"')))
}

fn first_label(host: &str) -> &str {
    let label = host.split('.').next().unwrap_or(host);
    label.split(':').next().unwrap_or(label)
}
