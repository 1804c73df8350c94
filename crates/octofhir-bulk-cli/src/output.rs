use anyhow::Result;
use colored::Colorize;
use octofhir_bulk_client::{ExportOutcome, JobState, OutputItem};
use serde_json::{Value, json};
use tabled::builder::Builder;
use tabled::settings::Style;
use url::Url;

use crate::cli::OutputFormat;

/// What the CLI knows about a job after a command ran.
pub struct JobReport {
    pub state: JobState,
    pub location: Option<Url>,
    pub progress: Option<String>,
    pub outcome: Option<ExportOutcome>,
}

impl JobReport {
    pub fn to_value(&self) -> Result<Value> {
        let mut value = json!({
            "state": self.state.to_string(),
            "location": self.location.as_ref().map(Url::as_str),
            "progress": self.progress,
        });
        match &self.outcome {
            Some(ExportOutcome::Completed(manifest)) => {
                value["manifest"] = serde_json::to_value(manifest)?;
            }
            Some(ExportOutcome::Failed(failure)) => {
                value["failure"] = serde_json::to_value(failure)?;
            }
            Some(ExportOutcome::Cancelled) | None => {}
        }
        Ok(value)
    }
}

pub fn print_report(report: &JobReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_report_table(report),
        _ => print_value(&report.to_value()?, format),
    }
    Ok(())
}

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", format_yaml(value, 0));
        }
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn print_report_table(report: &JobReport) {
    println!("{}: {}", "State".cyan(), state_label(report.state));
    if let Some(location) = &report.location {
        println!("{}: {}", "Location".cyan(), location);
    }
    if let Some(progress) = &report.progress {
        println!("{}: {}", "Progress".cyan(), progress);
    }

    match &report.outcome {
        Some(ExportOutcome::Completed(manifest)) => {
            if let Some(tt) = manifest.transaction_time {
                println!("{}: {}", "Transaction time".cyan(), tt);
            }
            if manifest.requires_access_token {
                println!("{}: yes", "Requires token".cyan());
            }
            if let Some(message) = &manifest.message {
                println!("{}: {}", "Message".cyan(), message);
            }
            if manifest.output.is_empty() {
                println!("No files exported.");
            } else {
                println!("{}", items_table(&manifest.output));
            }
            if !manifest.error.is_empty() {
                println!("{}", "Errors".red());
                println!("{}", items_table(&manifest.error));
            }
        }
        Some(ExportOutcome::Failed(failure)) => {
            println!("{}: {}", "Failure".cyan(), failure.summary().red());
        }
        Some(ExportOutcome::Cancelled) | None => {}
    }
}

fn state_label(state: JobState) -> String {
    let label = state.to_string();
    match state {
        JobState::Completed => label.green().to_string(),
        JobState::Failed => label.red().to_string(),
        JobState::Cancelled => label.yellow().to_string(),
        JobState::NotStarted | JobState::Ongoing => label,
    }
}

fn items_table(items: &[OutputItem]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["#", "Type", "Count", "URL"]);
    for (idx, item) in items.iter().enumerate() {
        let count = item.count.map_or_else(|| "-".to_string(), |c| c.to_string());
        builder.push_record([
            (idx + 1).to_string(),
            item.resource_type.clone(),
            count,
            item.url.clone(),
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

// Simple YAML-like output without a serde_yaml dependency
fn format_yaml(value: &Value, indent: usize) -> String {
    let prefix = " ".repeat(indent);
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.contains('\n') {
                format!(
                    "|\n{}{}",
                    " ".repeat(indent + 2),
                    s.replace('\n', &format!("\n{}", " ".repeat(indent + 2)))
                )
            } else {
                format!("\"{s}\"")
            }
        }
        Value::Array(arr) => {
            if arr.is_empty() {
                return "[]".to_string();
            }
            let items: Vec<String> = arr
                .iter()
                .map(|v| format!("{prefix}- {}", format_yaml(v, indent + 2).trim_start()))
                .collect();
            format!("\n{}", items.join("\n"))
        }
        Value::Object(obj) => {
            if obj.is_empty() {
                return "{}".to_string();
            }
            let items: Vec<String> = obj
                .iter()
                .map(|(k, v)| {
                    let val = format_yaml(v, indent + 2);
                    if val.starts_with('\n') {
                        format!("{prefix}{k}:{val}")
                    } else {
                        format!("{prefix}{k}: {val}")
                    }
                })
                .collect();
            if indent == 0 {
                items.join("\n")
            } else {
                format!("\n{}", items.join("\n"))
            }
        }
    }
}
