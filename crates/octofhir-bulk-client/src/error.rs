use std::time::Duration;

use thiserror::Error;

/// Errors raised by the bulk export client.
///
/// Remote job failure and cancellation are not errors; they are reported as
/// [`ExportOutcome`](crate::ExportOutcome) values.
#[derive(Debug, Error)]
pub enum BulkClientError {
    /// The underlying HTTP exchange failed (connection, socket timeout, body read).
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server answered outside the asynchronous request pattern contract.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The caller used the API out of order or supplied invalid input.
    #[error("Caller contract violated: {0}")]
    CallerContract(String),

    /// A bounded wait elapsed before the job reached a terminal state.
    #[error("Export job did not finish within {0:?}")]
    Timeout(Duration),

    #[error("URL parsing error: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BulkClientError {
    /// Create a new Transport error without an underlying source
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolViolation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Create a new CallerContract error
    pub fn caller_contract(message: impl Into<String>) -> Self {
        Self::CallerContract(message.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    pub fn is_caller_contract(&self) -> bool {
        matches!(self, Self::CallerContract(_) | Self::InvalidUrl(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for BulkClientError {
    fn from(err: reqwest::Error) -> Self {
        let message = match err.url() {
            Some(url) => format!("request to {url} failed: {err}"),
            None => err.to_string(),
        };
        Self::Transport {
            message,
            source: Some(Box::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, BulkClientError>;
