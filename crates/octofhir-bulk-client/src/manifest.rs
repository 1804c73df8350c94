//! Terminal response bodies: the completion manifest and the failure report.
//!
//! Materialization never fails. An unreadable body is logged and replaced by an
//! empty manifest or report so that failure reporting cannot itself break the
//! caller's control flow.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// One file of a completed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl OutputItem {
    pub fn new(resource_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            url: url.into(),
            count: None,
        }
    }
}

/// The completion manifest returned by the status endpoint once an export succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionManifest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub transaction_time: Option<OffsetDateTime>,
    /// The kick-off request URL as echoed by the server.
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub requires_access_token: bool,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub error: Vec<OutputItem>,
    /// Free-text note some servers attach to the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extension: Map<String, Value>,
}

impl CompletionManifest {
    pub fn is_empty(&self) -> bool {
        self.output.is_empty() && self.error.is_empty()
    }
}

/// One issue of an `OperationOutcome`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIssue {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl OperationIssue {
    /// The most descriptive message available for this issue.
    pub fn message(&self) -> &str {
        self.diagnostics.as_deref().unwrap_or(&self.code)
    }
}

/// Structured failure detail of a job that ended with a 4xx or 5xx status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub status: u16,
    pub issues: Vec<OperationIssue>,
}

impl OperationFailure {
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return format!("HTTP {}", self.status);
        }
        let messages: Vec<&str> = self.issues.iter().map(OperationIssue::message).collect();
        format!("HTTP {}: {}", self.status, messages.join("; "))
    }
}

#[derive(Deserialize)]
struct OperationOutcomeBody {
    #[serde(rename = "resourceType")]
    resource_type: Option<String>,
    #[serde(default)]
    issue: Vec<IssueBody>,
}

#[derive(Deserialize)]
struct IssueBody {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    code: String,
    diagnostics: Option<String>,
    details: Option<CodeableConceptBody>,
}

#[derive(Deserialize)]
struct CodeableConceptBody {
    text: Option<String>,
}

/// Decodes the body of a success-classified terminal response.
pub fn materialize_manifest(body: Option<&[u8]>) -> CompletionManifest {
    let Some(bytes) = body.filter(|b| !b.iter().all(u8::is_ascii_whitespace)) else {
        tracing::info!("Bulk export finished without a manifest body");
        return CompletionManifest::default();
    };

    tracing::info!(bytes = bytes.len(), "Reading bulk export manifest");
    match serde_json::from_slice::<CompletionManifest>(bytes) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse bulk export manifest; treating as empty");
            CompletionManifest::default()
        }
    }
}

/// Decodes the body of a failure-classified terminal response.
pub fn materialize_failure(status: u16, body: Option<&[u8]>) -> OperationFailure {
    let mut failure = OperationFailure {
        status,
        issues: Vec::new(),
    };
    let Some(bytes) = body.filter(|b| !b.is_empty()) else {
        return failure;
    };

    match serde_json::from_slice::<OperationOutcomeBody>(bytes) {
        Ok(outcome) => {
            if let Some(rt) = outcome.resource_type.as_deref()
                && rt != "OperationOutcome"
            {
                tracing::warn!(resource_type = rt, "Failure body is not an OperationOutcome");
            }
            failure.issues = outcome
                .issue
                .into_iter()
                .map(|issue| OperationIssue {
                    severity: issue.severity,
                    code: issue.code,
                    diagnostics: issue
                        .diagnostics
                        .or_else(|| issue.details.and_then(|d| d.text)),
                })
                .collect();
        }
        Err(e) => {
            tracing::warn!(status, error = %e, "Failed to parse failure body; reporting no issues");
        }
    }
    failure
}
