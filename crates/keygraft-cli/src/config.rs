use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cli::OutputFormat;

/// Settings read from an optional TOML file. Command-line flags win.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub format: OutputFormat,
    pub preserve_metadata: bool,
    pub sources: SourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            preserve_metadata: true,
            sources: SourceConfig::default(),
        }
    }
}

/// Default donor checkpoints for `graft`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub v_pred: Option<PathBuf>,
    pub ztsnr: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
