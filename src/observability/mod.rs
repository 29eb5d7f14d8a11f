//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request handler, forwarders, config watcher produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (fmt subscriber, RUST_LOG aware)
//!     → Metrics endpoint (Prometheus scrape, opt-in)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line of a request
//! - Tokens are only ever logged redacted
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
