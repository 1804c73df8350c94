use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_bulk_client::{
    AuthHeader, BulkExportClient, CompletionManifest, ExportOutcome, ExportRequest, ExportJob,
    HttpResourceResolver, ResolvedItem, TypeFilter, resolve_manifest,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::cli::{ExportArgs, ExportScope, OutputFormat};
use crate::commands::finish;
use crate::output::{JobReport, print_report, print_success};

pub async fn export(
    client: &BulkExportClient,
    server: &str,
    args: &ExportArgs,
    auth: Option<AuthHeader>,
    format: OutputFormat,
) -> Result<()> {
    let request = build_request(server, args)?;
    let job = client.export(request).await?;

    if args.no_wait {
        let report = JobReport {
            state: job.state().await,
            location: job.location().await,
            progress: job.progress().await,
            outcome: job.result().await.ok(),
        };
        if let Some(location) = &report.location {
            print_success(&format!("Export started: {}", location.as_str().cyan()));
        }
        print_report(&report, format)?;
        return Ok(());
    }

    let outcome = wait_or_cancel(&job, args.timeout.map(Duration::from_secs)).await?;
    let report = JobReport {
        state: outcome.state(),
        location: job.location().await,
        progress: job.progress().await,
        outcome: Some(outcome.clone()),
    };
    print_report(&report, format)?;

    if let (ExportOutcome::Completed(manifest), Some(dir)) = (&outcome, &args.download) {
        let written = download(client, manifest, Path::new(dir), auth).await?;
        print_success(&format!("Downloaded {} file(s) to {}", written.len(), dir.cyan()));
    }

    finish(&outcome)
}

/// Waits for the job; Ctrl-C asks the server to cancel it.
async fn wait_or_cancel(job: &ExportJob, timeout: Option<Duration>) -> Result<ExportOutcome> {
    let location = job.location().await;
    let describe = || {
        location
            .as_ref()
            .map_or_else(String::new, |l| format!(" (status URL: {l})"))
    };

    tokio::select! {
        res = job.wait(timeout) => match res {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_timeout() => {
                Err(e).with_context(|| format!("Export is still running{}", describe()))
            }
            Err(e) => Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; cancelling bulk export");
            if job.cancel().await? {
                anyhow::bail!("Interrupted; cancellation requested{}", describe());
            }
            anyhow::bail!("Interrupted; server did not accept cancellation{}", describe());
        }
    }
}

pub fn build_request(server: &str, args: &ExportArgs) -> Result<ExportRequest> {
    let base = Url::parse(server).with_context(|| format!("Invalid server URL: {server}"))?;

    let mut request = match &args.scope {
        None | Some(ExportScope::System) => ExportRequest::system(base),
        Some(ExportScope::Patient) => ExportRequest::patient(base),
        Some(ExportScope::Group { id }) => ExportRequest::group(base, id.clone()),
    };

    if let Some(output_format) = &args.output_format {
        request = request.with_output_format(output_format.clone());
    }
    if let Some(since) = &args.since {
        let since = OffsetDateTime::parse(since, &Rfc3339)
            .with_context(|| format!("--since must be an RFC 3339 instant, got {since}"))?;
        request = request.with_since(since);
    }
    for resource_type in args.types.iter().flat_map(|t| t.split(',')) {
        let resource_type = resource_type.trim();
        if !resource_type.is_empty() {
            request = request.add_type(resource_type);
        }
    }
    for filter in &args.type_filters {
        let filter = TypeFilter::parse(filter)
            .with_context(|| format!("Invalid --type-filter: {filter}"))?;
        request = request.add_type_filter(filter);
    }
    Ok(request)
}

async fn download(
    client: &BulkExportClient,
    manifest: &CompletionManifest,
    dir: &Path,
    auth: Option<AuthHeader>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;

    let http = reqwest::Client::builder()
        .timeout(client.config().request_timeout())
        .user_agent(client.config().user_agent.clone())
        .build()?;
    let resolver = HttpResourceResolver::new(http, auth);
    let resolved = resolve_manifest(&resolver, manifest).await?;

    let mut written = write_items(dir, "", &resolved.output)?;
    written.extend(write_items(dir, "error-", &resolved.error)?);
    Ok(written)
}

/// Writes each item as `<prefix><n>-<Type>.ndjson`, numbered from 1 in manifest order.
fn write_items(dir: &Path, prefix: &str, items: &[ResolvedItem]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let path = dir.join(format!("{prefix}{}-{}.ndjson", idx + 1, item.resource_type));
        let mut content = String::new();
        for resource in &item.resources {
            content.push_str(&serde_json::to_string(resource)?);
            content.push('\n');
        }
        fs::write(&path, content).with_context(|| format!("Cannot write {}", path.display()))?;
        tracing::debug!(path = %path.display(), resources = item.resources.len(), "Wrote export file");
        written.push(path);
    }
    Ok(written)
}
