use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use octofhir_bulk_client::BulkClientConfig;
use serde::{Deserialize, Serialize};

use crate::cli::OutputFormat;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    pub server: Option<String>,
    pub format: Option<String>,
    pub token: Option<String>,
    pub min_poll_interval_ms: Option<u64>,
}

impl ProfileConfig {
    /// Updates one key from its string form, as given to `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server" => {
                url::Url::parse(value).with_context(|| format!("Invalid server URL: {value}"))?;
                self.server = Some(value.to_string());
            }
            "format" => {
                parse_format(value)?;
                self.format = Some(value.to_string());
            }
            "token" => self.token = Some(value.to_string()),
            "min_poll_interval_ms" => {
                let ms = value
                    .parse()
                    .with_context(|| format!("min_poll_interval_ms must be an integer, got {value}"))?;
                self.min_poll_interval_ms = Some(ms);
            }
            other => anyhow::bail!(
                "Unknown config key: {other}. Valid keys: server, format, token, min_poll_interval_ms"
            ),
        }
        Ok(())
    }

    pub fn output_format(&self) -> Result<Option<OutputFormat>> {
        self.format.as_deref().map(parse_format).transpose()
    }

    /// Client settings derived from this profile.
    pub fn client_config(&self) -> BulkClientConfig {
        let config = BulkClientConfig::default();
        match self.min_poll_interval_ms {
            Some(ms) => config.with_min_poll_interval(Duration::from_millis(ms)),
            None => config,
        }
    }
}

pub type ConfigFile = HashMap<String, ProfileConfig>;

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(value, true)
        .map_err(|_| anyhow::anyhow!("Unknown format: {value}. Valid formats: json, yaml, table"))
}

fn config_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".octofhir");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("bulk.toml"))
}

pub fn load_all() -> Result<ConfigFile> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(&path)?;
    let cfg: ConfigFile =
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(cfg)
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    let mut all = load_all()?;
    Ok(all.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    let mut all = load_all()?;
    all.insert(profile.to_string(), config.clone());
    let content = toml::to_string_pretty(&all)?;
    fs::write(config_path()?, content)?;
    Ok(())
}

pub fn resolve_server(cli_server: &Option<String>, cfg: &ProfileConfig) -> Result<String> {
    // 1. --server flag / OCTOFHIR_URL env
    if let Some(s) = cli_server {
        return Ok(s.clone());
    }
    // 2. bulk.toml profile
    if let Some(s) = &cfg.server {
        return Ok(s.clone());
    }
    anyhow::bail!(
        "No server URL configured. Use --server, set OCTOFHIR_URL env var, or run: octofhir-bulk config set server <url>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_keys() {
        let mut cfg = ProfileConfig::default();
        cfg.set("server", "http://localhost:8080/fhir").unwrap();
        cfg.set("format", "TABLE").unwrap();
        cfg.set("token", "abc").unwrap();
        cfg.set("min_poll_interval_ms", "2500").unwrap();

        assert_eq!(cfg.server.as_deref(), Some("http://localhost:8080/fhir"));
        assert_eq!(cfg.output_format().unwrap(), Some(OutputFormat::Table));
        assert_eq!(cfg.token.as_deref(), Some("abc"));
        assert_eq!(
            cfg.client_config().min_poll_interval(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut cfg = ProfileConfig::default();
        assert!(cfg.set("server", "not a url").is_err());
        assert!(cfg.set("format", "xml").is_err());
        assert!(cfg.set("min_poll_interval_ms", "soon").is_err());
        assert!(cfg.set("color", "blue").is_err());
        assert_eq!(cfg, ProfileConfig::default());
    }

    #[test]
    fn test_resolve_server_precedence() {
        let cfg = ProfileConfig {
            server: Some("http://profile.test/fhir".into()),
            ..Default::default()
        };

        assert_eq!(
            resolve_server(&Some("http://flag.test/fhir".into()), &cfg).unwrap(),
            "http://flag.test/fhir"
        );
        assert_eq!(resolve_server(&None, &cfg).unwrap(), "http://profile.test/fhir");
        assert!(resolve_server(&None, &ProfileConfig::default()).is_err());
    }

    #[test]
    fn test_profile_file_parses() {
        let content = r#"
[default]
server = "http://localhost:8080/fhir"
min_poll_interval_ms = 500

[staging]
format = "yaml"
"#;
        let all: ConfigFile = toml::from_str(content).unwrap();
        assert_eq!(all["default"].min_poll_interval_ms, Some(500));
        assert_eq!(all["staging"].output_format().unwrap(), Some(OutputFormat::Yaml));
        assert_eq!(all["default"].client_config().min_poll_interval(), Duration::from_millis(500));
    }
}
