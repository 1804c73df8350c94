//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by the transport and every export job it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkClientConfig {
    /// Lower bound for the sleep between two polls inside a wait, applied
    /// even when the server sends no (or a shorter) `Retry-After`.
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    /// Per-request timeout for the HTTP transport.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extra headers sent with every kick-off, poll and cancel request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_min_poll_interval_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    concat!("octofhir-bulk-client/", env!("CARGO_PKG_VERSION")).into()
}

impl Default for BulkClientConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: default_min_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            headers: Vec::new(),
        }
    }
}

impl BulkClientConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Sets the minimum interval between polls while waiting.
    #[must_use]
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a header sent with every transport request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}
