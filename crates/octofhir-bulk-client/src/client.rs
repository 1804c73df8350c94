use std::sync::Arc;

use url::Url;

use crate::config::BulkClientConfig;
use crate::error::Result;
use crate::job::ExportJob;
use crate::request::{ExportRequest, RequestDescriptor};
use crate::transport::{AuthHeader, ExportTransport, HttpTransport};

/// Entry point: starts export jobs over a shared transport.
#[derive(Clone)]
pub struct BulkExportClient {
    transport: Arc<dyn ExportTransport>,
    config: Arc<BulkClientConfig>,
}

impl BulkExportClient {
    pub fn new(transport: Arc<dyn ExportTransport>, config: BulkClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    /// Client over [`HttpTransport`], optionally authenticating every request.
    pub fn http(config: BulkClientConfig, auth: Option<AuthHeader>) -> Result<Self> {
        let mut transport = HttpTransport::new(&config)?;
        if let Some(auth) = auth {
            transport = transport.with_auth(auth);
        }
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &BulkClientConfig {
        &self.config
    }

    /// Sends the kick-off request and returns the job in whatever state the
    /// first response put it in. The request is never retried.
    ///
    /// # Errors
    ///
    /// Transport failures and protocol violations (for example a `202` without
    /// `Content-Location`) are returned as errors; no job is created.
    pub async fn submit(&self, request: &RequestDescriptor) -> Result<ExportJob> {
        let job = ExportJob::new(self.transport.clone(), self.config.min_poll_interval());
        let state = job.initiate(request).await?;
        tracing::info!(url = %request.uri(), state = %state, "Bulk export submitted");
        Ok(job)
    }

    /// Builds the descriptor for `request` and submits it.
    pub async fn export(&self, request: ExportRequest) -> Result<ExportJob> {
        let descriptor = request.into_descriptor()?;
        self.submit(&descriptor).await
    }

    /// Attaches to a job that is already running, known by its polling location.
    pub fn resume(&self, location: Url) -> ExportJob {
        ExportJob::resume(
            self.transport.clone(),
            self.config.min_poll_interval(),
            location,
        )
    }
}
