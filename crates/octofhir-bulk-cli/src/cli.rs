use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "octofhir-bulk")]
#[command(about = "OctoFHIR Bulk: run FHIR Bulk Data exports against any FHIR server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// FHIR base URL (overrides config and OCTOFHIR_URL env var)
    #[arg(short, long, global = true, env = "OCTOFHIR_URL")]
    pub server: Option<String>,

    /// Config profile name
    #[arg(short, long, global = true, env = "OCTOFHIR_PROFILE", default_value = "default")]
    pub profile: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Bearer token (overrides the profile token)
    #[arg(long, global = true, env = "OCTOFHIR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a bulk export and wait for its manifest
    Export(ExportArgs),
    /// Check a running export by its status URL
    Status(LocationArgs),
    /// Cancel a running export by its status URL
    Cancel(LocationArgs),
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ExportScope {
    /// Whole server (`$export`)
    System,
    /// All patients (`Patient/$export`)
    Patient,
    /// Members of a group (`Group/<id>/$export`)
    Group {
        /// Group id
        id: String,
    },
}

/// Export options are global so they may follow the scope subcommand.
#[derive(clap::Args)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub scope: Option<ExportScope>,

    /// Resource type to include (repeatable)
    #[arg(long = "type", value_name = "TYPE", global = true)]
    pub types: Vec<String>,

    /// Only include resources changed after this instant (RFC 3339)
    #[arg(long, global = true)]
    pub since: Option<String>,

    /// Type filter such as `Observation?status=final` (repeatable)
    #[arg(long = "type-filter", value_name = "QUERY", global = true)]
    pub type_filters: Vec<String>,

    /// Requested output format
    #[arg(long, global = true)]
    pub output_format: Option<String>,

    /// Give up waiting after this many seconds (the export keeps running)
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Print the status URL instead of waiting
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Download the exported files into this directory
    #[arg(long, value_name = "DIR", global = true)]
    pub download: Option<String>,
}

#[derive(clap::Args)]
pub struct LocationArgs {
    /// Status URL returned by the export kick-off
    pub location: String,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current config
    Show,
    /// Set config value
    Set(ConfigSetArgs),
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Key to set (server, format, token, min_poll_interval_ms)
    pub key: String,
    /// Value
    pub value: String,
}
