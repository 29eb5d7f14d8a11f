//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, schemes and header names before they reach a request
//! - Validate value ranges (body ceiling > 0, preflight status)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on hot reload

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.scheme must be \"http\" or \"https\", got {0:?}")]
    InvalidScheme(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field}: {value:?} is not a valid header name")]
    InvalidHeaderName { field: &'static str, value: String },

    #[error("{field}: {value:?} is not a valid header value")]
    InvalidHeaderValue { field: &'static str, value: String },

    #[error("rewrite.max_body_bytes must be greater than zero")]
    ZeroBodyCeiling,

    #[error("cors.preflight_status must be 200 or 204, got {0}")]
    InvalidPreflightStatus(u16),

    #[error("listener.tls requires both cert_path and key_path")]
    IncompleteTls,
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::IncompleteTls);
        }
    }

    let upstream = &config.upstream;
    if upstream.scheme != "http" && upstream.scheme != "https" {
        errors.push(ValidationError::InvalidScheme(upstream.scheme.clone()));
    }

    for (field, value) in [
        ("upstream.sandbox_host_marker", &upstream.sandbox_host_marker),
        ("upstream.token_query_param", &upstream.token_query_param),
        ("upstream.token_cookie_prefix", &upstream.token_cookie_prefix),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::Empty(field));
        }
    }

    let header_fields = [
        ("upstream.token_header", &upstream.token_header),
        ("upstream.bypass_header", &upstream.bypass_header),
    ];
    for (field, value) in header_fields {
        check_header_name(field, value, &mut errors);
    }
    for value in &config.security.strip_response_headers {
        check_header_name("security.strip_response_headers", value, &mut errors);
    }

    for (field, value) in [
        ("cors.allow_origin", &config.cors.allow_origin),
        ("cors.allow_methods", &config.cors.allow_methods),
        ("cors.allow_headers", &config.cors.allow_headers),
    ] {
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::InvalidHeaderValue {
                field,
                value: value.clone(),
            });
        }
    }

    if config.rewrite.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyCeiling);
    }

    if !matches!(config.cors.preflight_status, 200 | 204) {
        errors.push(ValidationError::InvalidPreflightStatus(config.cors.preflight_status));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_header_name(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.is_empty() {
        errors.push(ValidationError::Empty(field));
    } else if HeaderName::from_bytes(value.as_bytes()).is_err() {
        errors.push(ValidationError::InvalidHeaderName {
            field,
            value: value.to_string(),
        });
    }
}
