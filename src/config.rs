use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Settings from `huddle/config.toml` under the platform config
/// directory. Every field is optional; command-line flags override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub server_url: Option<String>,
    pub token: Option<String>,
    pub workspace: Option<String>,
    pub default_channel: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("huddle").join("config.toml"))
    }

    /// Log file location; the TUI owns the terminal, so tracing output
    /// goes to a file instead of stderr.
    pub fn log_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("huddle").join("huddle.log"))
    }
}
