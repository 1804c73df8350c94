//! Client for the FHIR Bulk Data asynchronous request pattern.
//!
//! A kick-off request (`$export` with `Prefer: respond-async`) either finishes
//! synchronously or returns `202 Accepted` with a `Content-Location` to poll.
//! [`BulkExportClient::submit`] sends the kick-off and hands back an
//! [`ExportJob`], which polls the status endpoint on demand, honours
//! `Retry-After`, supports cancellation and resolves to an [`ExportOutcome`].
//!
//! ```ignore
//! use octofhir_bulk_client::{BulkClientConfig, BulkExportClient, ExportOutcome, ExportRequest};
//!
//! let client = BulkExportClient::http(BulkClientConfig::default(), None)?;
//! let job = client
//!     .export(ExportRequest::patient(Url::parse("http://localhost:8080/fhir/")?).add_type("Condition"))
//!     .await?;
//!
//! match job.wait(Some(Duration::from_secs(600))).await? {
//!     ExportOutcome::Completed(manifest) => println!("{} files", manifest.output.len()),
//!     ExportOutcome::Failed(failure) => eprintln!("{}", failure.summary()),
//!     ExportOutcome::Cancelled => eprintln!("cancelled"),
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod interpret;
pub mod job;
pub mod manifest;
pub mod request;
pub mod resolver;
pub mod response;
pub mod transport;

pub use client::BulkExportClient;
pub use config::BulkClientConfig;
pub use error::{BulkClientError, Result};
pub use job::{ExportJob, ExportOutcome, JobState};
pub use manifest::{CompletionManifest, OperationFailure, OperationIssue, OutputItem};
pub use request::{ExportLevel, ExportRequest, RequestDescriptor, TypeFilter};
pub use resolver::{HttpResourceResolver, ResolvedExport, ResolvedItem, ResourceResolver, resolve_manifest};
pub use response::RawResponse;
pub use transport::{AuthHeader, ExportTransport, HttpTransport, RequestInterceptor};
