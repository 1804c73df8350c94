use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_bulk_client::BulkExportClient;
use url::Url;

use crate::cli::OutputFormat;
use crate::commands::finish;
use crate::output::{JobReport, print_report, print_success};

fn parse_location(location: &str) -> Result<Url> {
    Url::parse(location).with_context(|| format!("Invalid status URL: {location}"))
}

/// Polls a running export once (or answers from its cached final state) and reports it.
pub async fn status(client: &BulkExportClient, location: &str, format: OutputFormat) -> Result<()> {
    let job = client.resume(parse_location(location)?);
    let done = job.is_done().await?;

    let outcome = if done { Some(job.result().await?) } else { None };
    let report = JobReport {
        state: job.state().await,
        location: job.location().await,
        progress: job.progress().await,
        outcome,
    };
    print_report(&report, format)?;

    match &report.outcome {
        Some(outcome) => finish(outcome),
        None => Ok(()),
    }
}

pub async fn cancel(client: &BulkExportClient, location: &str) -> Result<()> {
    let job = client.resume(parse_location(location)?);
    if !job.cancel().await? {
        anyhow::bail!("Server did not accept cancellation of {location}");
    }
    print_success(&format!("Cancellation requested for {}", location.cyan()));
    Ok(())
}
