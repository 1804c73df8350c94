//! Raw responses exchanged with the transport.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{BulkClientError, Result};

/// A status code, a case-insensitive multi-valued header map and an optional
/// body, exactly as received from the remote endpoint.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    status: u16,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn from_parts(status: u16, headers: HeaderMap, body: Option<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Appends a header value, keeping values already present under the same name.
    ///
    /// # Errors
    ///
    /// Returns `CallerContract` if the name or value is not a valid HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BulkClientError::caller_contract(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BulkClientError::caller_contract(format!("invalid header value {value:?}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// All values of a header, in the order the server sent them.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// The first value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Moves the body out of the response; later calls return `None`.
    pub fn take_body(&mut self) -> Option<Vec<u8>> {
        self.body.take()
    }
}
