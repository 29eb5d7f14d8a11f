//! Sandbox host recognition.
//!
//! Sandbox preview hosts look like `6080-<sandbox-id>.proxy.daytona.works`.
//! The marker is a plain substring so regional and staging domains that share
//! it are recognised too.

/// Decides whether a host name belongs to a sandbox.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if `host` is a sandbox host.
    fn matches(&self, host: &str) -> bool;
}

/// Matches hosts containing a fixed marker, ignoring ASCII case.
#[derive(Debug, Clone)]
pub struct SandboxHostMatcher {
    marker: String,
}

impl SandboxHostMatcher {
    /// Create a matcher for `marker`. The marker is normalized to lowercase.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().to_ascii_lowercase(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl Matcher for SandboxHostMatcher {
    fn matches(&self, host: &str) -> bool {
        !self.marker.is_empty() && host.to_ascii_lowercase().contains(&self.marker)
    }
}
