//! Configuration management for the CLI

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Defaults read from `~/.config/kscale/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Namespace used when --namespace is not given, instead of the kube context namespace
    pub default_namespace: Option<String>,
    /// Default output format ("table" or "json")
    pub default_format: Option<String>,
    /// Prometheus base URL for metric triggers
    pub prometheus_url: Option<String>,
}

impl Config {
    /// Load configuration from file, or defaults when there is none
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        self.default_format
            .as_deref()
            .and_then(|f| OutputFormat::from_str(f, true).ok())
    }

    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("kscale").join("config.json"))
    }
}
