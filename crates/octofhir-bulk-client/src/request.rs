//! Kick-off request building.
//!
//! Builds the `Parameters` resource for a system, patient or group level
//! `$export` and freezes it into a [`RequestDescriptor`].
//!
//! ```ignore
//! use octofhir_bulk_client::{ExportRequest, TypeFilter};
//!
//! let descriptor = ExportRequest::system(Url::parse("http://localhost:8080/fhir/")?)
//!     .add_type("Condition")
//!     .add_type_filter(TypeFilter::new("Condition", "clinicalStatus", "active"))
//!     .into_descriptor()?;
//! ```

use std::fmt;

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::error::{BulkClientError, Result};

pub const NDJSON_CONTENT_TYPE: &str = "application/fhir+ndjson";
pub const FHIR_JSON_CONTENT_TYPE: &str = "application/fhir+json";

/// An immutable, already serialized kick-off request and its target URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    uri: Url,
    content_type: String,
    body: Vec<u8>,
}

impl RequestDescriptor {
    /// # Errors
    ///
    /// Returns `CallerContract` unless the URI is http or https.
    pub fn new(uri: Url, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<Self> {
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(BulkClientError::caller_contract(format!(
                "export URI must be http(s), got {uri}"
            )));
        }
        Ok(Self {
            uri,
            content_type: content_type.into(),
            body: body.into(),
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Which data set the export covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportLevel {
    System,
    Patient,
    Group(String),
}

impl ExportLevel {
    fn path(&self) -> String {
        match self {
            Self::System => "$export".to_string(),
            Self::Patient => "Patient/$export".to_string(),
            Self::Group(id) => format!("Group/{id}/$export"),
        }
    }
}

impl fmt::Display for ExportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Patient => write!(f, "patient"),
            Self::Group(id) => write!(f, "group/{id}"),
        }
    }
}

/// A `_typeFilter` entry: a resource type restricted by search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFilter {
    resource_type: String,
    queries: Vec<(String, String)>,
}

impl TypeFilter {
    pub fn new(
        resource_type: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            queries: vec![(param.into(), value.into())],
        }
    }

    #[must_use]
    pub fn and(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.push((param.into(), value.into()));
        self
    }

    /// Parses `Type?a=1&b=2`.
    ///
    /// # Errors
    ///
    /// Returns `CallerContract` if the type or a query is missing.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || BulkClientError::caller_contract(format!("invalid type filter {raw:?}"));

        let (resource_type, query) = raw.split_once('?').ok_or_else(invalid)?;
        if resource_type.is_empty() {
            return Err(invalid());
        }
        let queries = query
            .split('&')
            .map(|pair| {
                pair.split_once('=')
                    .filter(|(k, _)| !k.is_empty())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(invalid)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            resource_type: resource_type.to_string(),
            queries,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_type)?;
        let params: Vec<String> = self
            .queries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if !params.is_empty() {
            write!(f, "?{}", params.join("&"))?;
        }
        Ok(())
    }
}

/// Builder for a bulk export kick-off request.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    base_url: Url,
    level: ExportLevel,
    output_format: String,
    since: Option<OffsetDateTime>,
    types: Vec<String>,
    type_filters: Vec<TypeFilter>,
}

impl ExportRequest {
    pub fn new(base_url: Url, level: ExportLevel) -> Self {
        Self {
            base_url,
            level,
            output_format: NDJSON_CONTENT_TYPE.to_string(),
            since: None,
            types: Vec::new(),
            type_filters: Vec::new(),
        }
    }

    pub fn system(base_url: Url) -> Self {
        Self::new(base_url, ExportLevel::System)
    }

    pub fn patient(base_url: Url) -> Self {
        Self::new(base_url, ExportLevel::Patient)
    }

    pub fn group(base_url: Url, group_id: impl Into<String>) -> Self {
        Self::new(base_url, ExportLevel::Group(group_id.into()))
    }

    #[must_use]
    pub fn with_output_format(mut self, output_format: impl Into<String>) -> Self {
        self.output_format = output_format.into();
        self
    }

    #[must_use]
    pub fn with_since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn add_type(mut self, resource_type: impl Into<String>) -> Self {
        self.types.push(resource_type.into());
        self
    }

    #[must_use]
    pub fn add_type_filter(mut self, filter: TypeFilter) -> Self {
        self.type_filters.push(filter);
        self
    }

    pub fn level(&self) -> &ExportLevel {
        &self.level
    }

    /// The kick-off endpoint. A base URL without a trailing slash is treated
    /// as a directory, so `http://host/fhir` yields `http://host/fhir/$export`.
    pub fn export_url(&self) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&self.level.path())?)
    }

    /// Renders the request as a FHIR `Parameters` resource.
    pub fn to_parameters(&self) -> Result<Value> {
        let mut parameter = vec![json!({
            "name": "_outputFormat",
            "valueString": self.output_format,
        })];

        if let Some(since) = self.since {
            let formatted = since.format(&Rfc3339).map_err(|e| {
                BulkClientError::caller_contract(format!("_since is not representable: {e}"))
            })?;
            parameter.push(json!({"name": "_since", "valueInstant": formatted}));
        }

        if !self.types.is_empty() {
            parameter.push(json!({"name": "_type", "valueString": self.types.join(",")}));
        }

        if !self.type_filters.is_empty() {
            let filters: Vec<String> = self.type_filters.iter().map(ToString::to_string).collect();
            parameter.push(json!({"name": "_typeFilter", "valueString": filters.join(",")}));
        }

        Ok(json!({
            "resourceType": "Parameters",
            "parameter": parameter,
        }))
    }

    /// Freezes the request into the descriptor handed to the transport.
    pub fn into_descriptor(self) -> Result<RequestDescriptor> {
        let uri = self.export_url()?;
        let body = serde_json::to_vec(&self.to_parameters()?)?;
        RequestDescriptor::new(uri, FHIR_JSON_CONTENT_TYPE, body)
    }
}
