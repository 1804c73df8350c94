//! Fetching the files listed in a completion manifest.
//!
//! The job controller stops at the manifest. Turning its URLs into resources
//! is delegated to a [`ResourceResolver`] so callers can plug in their own
//! storage or parsing.

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use crate::error::{BulkClientError, Result};
use crate::manifest::{CompletionManifest, OutputItem};
use crate::request::NDJSON_CONTENT_TYPE;
use crate::transport::AuthHeader;

/// One manifest item with its decoded NDJSON content.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub resource_type: String,
    pub url: String,
    pub resources: Vec<Value>,
}

/// A completion manifest whose items have all been fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExport {
    pub transaction_time: Option<OffsetDateTime>,
    pub request: String,
    pub requires_access_token: bool,
    pub output: Vec<ResolvedItem>,
    pub error: Vec<ResolvedItem>,
    pub message: Option<String>,
    pub extension: Map<String, Value>,
}

#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn fetch(&self, item: &OutputItem, requires_access_token: bool) -> Result<ResolvedItem>;
}

/// Fetches every output and error item of `manifest`, preserving manifest order.
pub async fn resolve_manifest(
    resolver: &dyn ResourceResolver,
    manifest: &CompletionManifest,
) -> Result<ResolvedExport> {
    let mut output = Vec::with_capacity(manifest.output.len());
    for item in &manifest.output {
        output.push(resolver.fetch(item, manifest.requires_access_token).await?);
    }

    let mut error = Vec::with_capacity(manifest.error.len());
    for item in &manifest.error {
        error.push(resolver.fetch(item, manifest.requires_access_token).await?);
    }

    Ok(ResolvedExport {
        transaction_time: manifest.transaction_time,
        request: manifest.request.clone(),
        requires_access_token: manifest.requires_access_token,
        output,
        error,
        message: manifest.message.clone(),
        extension: manifest.extension.clone(),
    })
}

/// Splits an NDJSON document into JSON values, skipping blank lines.
pub fn parse_ndjson(content: &str) -> Result<Vec<Value>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(BulkClientError::from))
        .collect()
}

/// [`ResourceResolver`] that downloads items over HTTP.
pub struct HttpResourceResolver {
    http: reqwest::Client,
    auth: Option<AuthHeader>,
}

impl HttpResourceResolver {
    pub fn new(http: reqwest::Client, auth: Option<AuthHeader>) -> Self {
        Self { http, auth }
    }
}

#[async_trait]
impl ResourceResolver for HttpResourceResolver {
    async fn fetch(&self, item: &OutputItem, requires_access_token: bool) -> Result<ResolvedItem> {
        let url = Url::parse(&item.url).map_err(|e| {
            BulkClientError::protocol_violation(format!(
                "manifest item URL {:?} is invalid: {e}",
                item.url
            ))
        })?;
        tracing::debug!(url = %url, resource_type = %item.resource_type, "Fetching export file");

        let mut request = self.http.get(url.clone()).header("Accept", NDJSON_CONTENT_TYPE);
        if requires_access_token {
            match &self.auth {
                Some(auth) => request = auth.apply(request),
                None => tracing::warn!(url = %url, "Manifest requires an access token but none is configured"),
            }
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BulkClientError::transport(format!(
                "GET {url} returned HTTP {status}"
            )));
        }
        let body = resp.text().await?;
        let resources = parse_ndjson(&body)?;

        tracing::info!(
            url = %url,
            resource_type = %item.resource_type,
            resources = resources.len(),
            "Fetched export file"
        );

        Ok(ResolvedItem {
            resource_type: item.resource_type.clone(),
            url: item.url.clone(),
            resources,
        })
    }
}
