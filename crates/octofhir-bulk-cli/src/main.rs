mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use octofhir_bulk_client::{AuthHeader, BulkExportClient};

use cli::{Cli, Commands};
use config::ProfileConfig;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let profile = &cli.profile;
    let cfg = config::load_profile(profile)?;
    let format = match cli.format {
        Some(format) => format,
        None => cfg.output_format()?.unwrap_or_default(),
    };

    match &cli.command {
        Commands::Export(args) => {
            let server = config::resolve_server(&cli.server, &cfg)?;
            let auth = auth_header(&cli, &cfg);
            let client = make_client(&cfg, auth.clone())?;
            commands::export::export(&client, &server, args, auth, format).await?;
        }
        Commands::Status(args) => {
            let client = make_client(&cfg, auth_header(&cli, &cfg))?;
            commands::job::status(&client, &args.location, format).await?;
        }
        Commands::Cancel(args) => {
            let client = make_client(&cfg, auth_header(&cli, &cfg))?;
            commands::job::cancel(&client, &args.location).await?;
        }
        Commands::Config(args) => match &args.command {
            cli::ConfigCommands::Show => {
                println!("{}: {}", "Profile".cyan(), profile);
                println!(
                    "{}: {}",
                    "Server".cyan(),
                    cfg.server.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "{}: {}",
                    "Format".cyan(),
                    cfg.format.as_deref().unwrap_or("json")
                );
                println!(
                    "{}: {}",
                    "Token".cyan(),
                    if cfg.token.is_some() { "(set)" } else { "(not set)" }
                );
                println!(
                    "{}: {} ms",
                    "Min poll interval".cyan(),
                    cfg.client_config().min_poll_interval_ms
                );
            }
            cli::ConfigCommands::Set(set_args) => {
                let mut cfg = cfg.clone();
                cfg.set(&set_args.key, &set_args.value)?;
                config::save_profile(profile, &cfg)?;
                let shown = if set_args.key == "token" { "(hidden)" } else { set_args.value.as_str() };
                output::print_success(&format!("Set {} = {}", set_args.key, shown));
            }
        },
    }

    Ok(())
}

fn auth_header(cli: &Cli, cfg: &ProfileConfig) -> Option<AuthHeader> {
    cli.token
        .clone()
        .or_else(|| cfg.token.clone())
        .map(|token| AuthHeader::Bearer { token })
}

fn make_client(cfg: &ProfileConfig, auth: Option<AuthHeader>) -> Result<BulkExportClient> {
    Ok(BulkExportClient::http(cfg.client_config(), auth)?)
}
