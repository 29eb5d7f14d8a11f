//! Sandbox VNC reverse proxy library.
//!
//! Fronts sandbox-hosted noVNC sessions behind one stable origin, carrying
//! the sandbox preview token through query, cookie, Referer and rewritten
//! page bodies.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod token;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
