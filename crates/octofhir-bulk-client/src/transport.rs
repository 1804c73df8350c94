//! Transport port and its reqwest implementation.
//!
//! The job controller only ever talks to an [`ExportTransport`]. The three
//! calls map onto the asynchronous request pattern:
//!
//! - `initiate`: `POST {export-url}` with `Prefer: respond-async`
//! - `poll`: `GET {status-url}`
//! - `cancel`: `DELETE {status-url}`
//!
//! Implementations must be safe to share between jobs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use url::Url;

use crate::config::BulkClientConfig;
use crate::error::{BulkClientError, Result};
use crate::request::{FHIR_JSON_CONTENT_TYPE, RequestDescriptor};
use crate::response::RawResponse;

pub const PREFER_HEADER: &str = "prefer";
pub const RESPOND_ASYNC: &str = "respond-async";

#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Sends the kick-off request.
    async fn initiate(&self, request: &RequestDescriptor) -> Result<RawResponse>;

    /// Requests the current status of a job.
    async fn poll(&self, location: &Url) -> Result<RawResponse>;

    /// Asks the server to cancel a job.
    async fn cancel(&self, location: &Url) -> Result<RawResponse>;
}

/// Hook applied to every outgoing request, in registration order.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

/// Credentials attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl AuthHeader {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
            Self::Bearer { token } => request.bearer_auth(token),
        }
    }
}

/// Sets the `Authorization` header.
pub struct AuthInterceptor(pub AuthHeader);

impl RequestInterceptor for AuthInterceptor {
    fn intercept(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.0.apply(request)
    }
}

/// Adds a fixed set of headers.
pub struct StaticHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl StaticHeaders {
    /// # Errors
    ///
    /// Returns `CallerContract` if any name or value is not a valid header.
    pub fn new(headers: &[(String, String)]) -> Result<Self> {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    BulkClientError::caller_contract(format!("invalid header name {name:?}: {e}"))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    BulkClientError::caller_contract(format!("invalid header value for {name}: {e}"))
                })?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { headers })
    }
}

impl RequestInterceptor for StaticHeaders {
    fn intercept(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        request
    }
}

/// [`ExportTransport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl HttpTransport {
    /// Builds a client with the configured timeout, user agent and static headers.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the HTTP client cannot be created and
    /// `CallerContract` for invalid configured headers.
    pub fn new(config: &BulkClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        let mut transport = Self::with_client(http);
        if !config.headers.is_empty() {
            transport = transport.with_interceptor(StaticHeaders::new(&config.headers)?);
        }
        Ok(transport)
    }

    /// Wraps an existing client, e.g. one shared with other parts of an application.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            interceptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn with_auth(self, auth: AuthHeader) -> Self {
        self.with_interceptor(AuthInterceptor(auth))
    }

    fn request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url.clone());
        self.interceptors
            .iter()
            .fold(request, |req, interceptor| interceptor.intercept(req))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;
        let body = (!body.is_empty()).then(|| body.to_vec());
        Ok(RawResponse::from_parts(status, headers, body))
    }
}

#[async_trait]
impl ExportTransport for HttpTransport {
    async fn initiate(&self, request: &RequestDescriptor) -> Result<RawResponse> {
        tracing::info!(url = %request.uri(), "Initiating bulk data export");

        let builder = self
            .request(reqwest::Method::POST, request.uri())
            .header(PREFER_HEADER, RESPOND_ASYNC)
            .header(ACCEPT, FHIR_JSON_CONTENT_TYPE)
            .header(CONTENT_TYPE, request.content_type())
            .body(request.body().to_vec());
        self.send(builder).await
    }

    async fn poll(&self, location: &Url) -> Result<RawResponse> {
        tracing::debug!(url = %location, "Polling bulk export status");

        let builder = self
            .request(reqwest::Method::GET, location)
            .header(ACCEPT, "application/json");
        self.send(builder).await
    }

    async fn cancel(&self, location: &Url) -> Result<RawResponse> {
        tracing::info!(url = %location, "Cancelling bulk data export");

        let builder = self.request(reqwest::Method::DELETE, location);
        self.send(builder).await
    }
}
