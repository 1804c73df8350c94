pub mod export;
pub mod job;

use anyhow::Result;
use octofhir_bulk_client::ExportOutcome;

/// Maps an outcome to the process result: remote failure and cancellation exit non-zero.
pub fn finish(outcome: &ExportOutcome) -> Result<()> {
    match outcome {
        ExportOutcome::Completed(_) => Ok(()),
        ExportOutcome::Failed(failure) => anyhow::bail!("Export failed: {}", failure.summary()),
        ExportOutcome::Cancelled => anyhow::bail!("Export was cancelled"),
    }
}
