//! `trbconfig.yml` as a source of output directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};

/// Name of the project configuration file, looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "trbconfig.yml";

/// Output directory used when the config is absent or does not name one.
pub const DEFAULT_OUTPUT_DIR: &str = "build";

const OUTPUT_DIR_KEY: &str = "ruby_dir";
const SECONDARY_DIR_KEY: &str = "rbs_dir";

/// The directories the compiler writes into, relative to the project root
/// unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Compiled Ruby output.
    pub output_dir: String,

    /// Auxiliary output such as RBS signatures.
    pub secondary_dir: Option<String>,
}

impl OutputConfig {
    pub fn new(output_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            secondary_dir: None,
        }
    }

    /// Set the secondary directory.
    pub fn with_secondary_dir(mut self, dir: impl Into<String>) -> Self {
        self.secondary_dir = Some(dir.into());
        self
    }

    /// Absolute location of the output directory for `project_root`.
    pub fn output_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.output_dir)
    }

    /// Absolute location of the secondary directory, if configured.
    pub fn secondary_root(&self, project_root: &Path) -> Option<PathBuf> {
        self.secondary_dir
            .as_ref()
            .map(|dir| project_root.join(dir))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

/// Supplies a project's output directories.
///
/// `load` never fails: an absent or broken configuration is reported as the
/// defaults, which callers treat as fully valid.
pub trait ConfigSource: Send + Sync {
    /// Output directories for the project at `project_root`.
    fn load(&self, project_root: &Path) -> OutputConfig;

    /// Whether the project uses this tooling at all.
    fn recognizes(&self, project_root: &Path) -> bool;
}

/// Reads `trbconfig.yml` from the project root.
///
/// The file is scanned line by line for the two keys instead of being parsed
/// as YAML. Indentation is ignored, so keys nested under a section are found
/// too; the first occurrence of each key wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrbConfigFile;

impl TrbConfigFile {
    pub fn new() -> Self {
        Self
    }

    /// Path of the config file for a project.
    pub fn path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_FILE_NAME)
    }

    /// Read and parse the config file, reporting why it could not be read.
    pub fn read(project_root: &Path) -> Result<OutputConfig> {
        let path = Self::path(project_root);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ConfigError::NotFound(path)),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    /// Extract output directories from config file content.
    pub fn parse(content: &str) -> OutputConfig {
        let output_dir =
            scan_key(content, OUTPUT_DIR_KEY).unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());

        OutputConfig {
            output_dir,
            secondary_dir: scan_key(content, SECONDARY_DIR_KEY),
        }
    }
}

impl ConfigSource for TrbConfigFile {
    fn load(&self, project_root: &Path) -> OutputConfig {
        match Self::read(project_root) {
            Ok(config) => config,
            Err(ConfigError::NotFound(path)) => {
                debug!("No {} found, using defaults", path.display());
                OutputConfig::default()
            }
            Err(e) => {
                warn!("Using default output directory: {e}");
                OutputConfig::default()
            }
        }
    }

    fn recognizes(&self, project_root: &Path) -> bool {
        Self::path(project_root).is_file()
    }
}

/// First value of `key: value` at the start of a line. Quotes around the
/// value are dropped; the value stops at whitespace, a quote or `#`.
fn scan_key(content: &str, key: &str) -> Option<String> {
    let pattern = format!(r#"(?m)^[ \t]*{key}:[ \t]*["']?([^"'\s#]+)"#);
    let re = regex_lite::Regex::new(&pattern).ok()?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
