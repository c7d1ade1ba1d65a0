//! Configuration loading and types

use std::path::{Path, PathBuf};

use anyhost_exec::ConnectionConfig;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the anyhost binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Remote host; commands run locally when absent
    #[serde(default)]
    pub remote: Option<ConnectionConfig>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("parsing {}", path.display()))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns error on invalid TOML or an unusable `[remote]` table
    pub fn parse(content: &str) -> eyre::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if let Some(remote) = &config.remote {
            remote.validate()?;
        }
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("ANYHOST_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            PathBuf::from("anyhost.toml"),
            PathBuf::from("/etc/anyhost/anyhost.toml"),
            dirs::config_dir()
                .map(|p| p.join("anyhost/anyhost.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.is_file() {
                return Self::load(&path);
            }
        }

        // No file: run locally
        Ok(Config::default())
    }
}
