//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every section has a default so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the sandbox VNC proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Upstream sandbox host conventions (marker, token carriers, headers).
    pub upstream: UpstreamConfig,

    /// Response body rewriting.
    pub rewrite: RewriteConfig,

    /// CORS headers added to every non-upgrade response.
    pub cors: CorsConfig,

    /// Response header stripping.
    pub security: SecurityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration. The browser-facing side is normally HTTPS.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// How sandbox hosts are recognised and authorised upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Scheme used to reach the sandbox host ("https" or "http").
    pub scheme: String,

    /// Substring that identifies sandbox proxy domains.
    pub sandbox_host_marker: String,

    /// Query parameter carrying the preview token.
    pub token_query_param: String,

    /// Cookie name prefix; the host's first label is appended.
    pub token_cookie_prefix: String,

    /// Header carrying the resolved token to the sandbox host.
    pub token_header: String,

    /// Header asking the sandbox host to skip its interstitial warning page.
    pub bypass_header: String,

    /// Forwarded when the browser sent no User-Agent.
    pub default_user_agent: String,

    /// Forwarded when the browser sent no Accept.
    pub default_accept: String,

    /// Forwarded when the browser sent no Accept-Language.
    pub default_accept_language: String,

    /// Redirects followed on the plain HTTP branch.
    pub max_redirects: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            sandbox_host_marker: "proxy.daytona.works".to_string(),
            token_query_param: "token".to_string(),
            token_cookie_prefix: "daytona_token_".to_string(),
            token_header: "x-daytona-preview-token".to_string(),
            bypass_header: "x-daytona-skip-preview-warning".to_string(),
            default_user_agent: "Mozilla/5.0 (compatible; sandbox-vnc-proxy)".to_string(),
            default_accept: "*/*".to_string(),
            default_accept_language: "en-US,en;q=0.9".to_string(),
            max_redirects: 10,
        }
    }
}

/// Token-injecting rewrite of textual responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Enable body rewriting. When off every body streams through untouched.
    pub enabled: bool,

    /// Largest body buffered for rewriting. Bigger bodies stream through.
    pub max_body_bytes: usize,

    /// Content-Type substrings classified as HTML.
    pub html_content_types: Vec<String>,

    /// Content-Type substrings classified as CSS.
    pub css_content_types: Vec<String>,

    /// Content-Type substrings classified as JavaScript.
    pub js_content_types: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_body_bytes: 8 * 1024 * 1024, // 8MB
            html_content_types: vec!["text/html".to_string(), "application/xhtml+xml".to_string()],
            css_content_types: vec!["text/css".to_string()],
            js_content_types: vec!["javascript".to_string(), "ecmascript".to_string()],
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Value of `Access-Control-Allow-Origin`.
    pub allow_origin: String,

    /// Value of `Access-Control-Allow-Methods`.
    pub allow_methods: String,

    /// Value of `Access-Control-Allow-Headers`.
    pub allow_headers: String,

    /// Status returned to `OPTIONS` preflights (200 or 204).
    pub preflight_status: u16,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "*".to_string(),
            preflight_status: 204,
        }
    }
}

/// Response header hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Headers removed from every non-upgrade response so the sandbox page
    /// can be framed by the dashboard.
    pub strip_response_headers: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strip_response_headers: vec![
                "x-frame-options".to_string(),
                "content-security-policy".to_string(),
            ],
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 10 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.upstream.scheme, "https");
        assert_eq!(config.upstream.token_header, "x-daytona-preview-token");
        assert_eq!(config.cors.allow_origin, "*");
        assert!(config.rewrite.enabled);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            scheme = "http"
            sandbox_host_marker = "proxy.example.works"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.scheme, "http");
        assert_eq!(config.upstream.sandbox_host_marker, "proxy.example.works");
        assert_eq!(config.upstream.token_cookie_prefix, "daytona_token_");
        assert_eq!(config.security.strip_response_headers.len(), 2);
    }
}
