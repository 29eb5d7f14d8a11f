//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, dispatch)
//!     → request.rs (classify, resolve target and token)
//!     → websocket.rs (upgrade handshake, byte splice)
//!       or forward.rs (plain request, optional body rewrite)
//!     → response.rs (usage page, upstream response rebuild)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestKind, UpstreamPlan, X_REQUEST_ID};
pub use server::{HttpServer, ProxyState, ServerError};
