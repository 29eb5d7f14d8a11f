//! Target resolution subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path (leading slash stripped) + Referer
//!     → target.rs (split "{host}/{path}", Referer recovery)
//!     → matcher.rs (is this a sandbox host?)
//!     → Return: TargetLocation, or nothing for the usage page
//! ```
//!
//! # Design Decisions
//! - Pure functions over strings; no I/O, no shared state
//! - A malformed Referer never fails the request, it only disables recovery
//! - The host is never allowed to carry a scheme or userinfo

pub mod matcher;
pub mod target;

pub use matcher::{Matcher, SandboxHostMatcher};
pub use target::{split_target, TargetLocation};
