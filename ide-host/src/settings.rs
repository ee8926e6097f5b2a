//! Persisted IDE settings.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trb_directory_watcher::WatcherConfig;

const SETTINGS_DIR: &str = "trb-ide";
const SETTINGS_FILE: &str = "settings.toml";

/// User-level settings for the T-Ruby integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeSettings {
    /// Compiler executable; a bare name is looked up on `PATH`.
    pub compiler_path: String,

    /// Run the compiler as a language server.
    pub enable_lsp: bool,

    /// Show diagnostics from the language server.
    pub enable_diagnostics: bool,

    /// Offer completions from the language server.
    pub enable_completion: bool,

    /// Output watcher tuning.
    pub watcher: WatcherConfig,
}

impl Default for IdeSettings {
    fn default() -> Self {
        Self {
            compiler_path: "trc".to_string(),
            enable_lsp: true,
            enable_diagnostics: true,
            enable_completion: true,
            watcher: WatcherConfig::default(),
        }
    }
}

impl IdeSettings {
    /// Settings file under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }

    /// Write settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("failed to serialize settings")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Update one setting from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "compiler_path" => {
                let value = value.trim();
                self.compiler_path = if value.is_empty() {
                    Self::default().compiler_path
                } else {
                    value.to_string()
                };
            }
            "enable_lsp" => self.enable_lsp = parse_bool(key, value)?,
            "enable_diagnostics" => self.enable_diagnostics = parse_bool(key, value)?,
            "enable_completion" => self.enable_completion = parse_bool(key, value)?,
            "watcher.quiet_period_ms" => self.watcher.quiet_period_ms = parse_millis(key, value)?,
            "watcher.poll_timeout_ms" => self.watcher.poll_timeout_ms = parse_millis(key, value)?,
            _ => bail!("unknown setting: {key}"),
        }
        Ok(())
    }

    /// Command line that starts the language server, if enabled.
    pub fn lsp_command(&self) -> Option<Vec<String>> {
        self.enable_lsp
            .then(|| vec![self.compiler_path.clone(), "--lsp".to_string()])
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("{key} expects true or false, got {other:?}"),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} expects milliseconds, got {value:?}"))
}
