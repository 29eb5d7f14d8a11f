//! Response header policy.
//!
//! # Data Flow
//! ```text
//! Upstream response (non-101):
//!     → headers.rs (strip hop-by-hop, strip framing/CSP headers)
//!     → headers.rs (overlay CORS headers)
//!     → Return to browser
//!
//! Upstream 101 response:
//!     → returned untouched
//! ```

pub mod headers;

pub use headers::{strip_hop_by_hop, HeaderPolicy};
