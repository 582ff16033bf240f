//! Configuration for shrimp pipelines.
//!
//! Configuration is loaded from `<config dir>/shrimp/config.toml`
//! (`~/.config/shrimp/config.toml` on Linux). Every field is optional.
//!
//! Nothing is loaded implicitly: `Pipeline::default()` uses
//! [`ShrimpConfig::default`]. Use `Pipeline::from_user_config()`, or pass
//! `ShrimpConfig::load()?` to `Pipeline::with_config` and
//! `WorkerPool::from_config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Shell used for string operands and `shell_cmd`.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Pipeline-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrimpConfig {
    /// Shell that runs string operands (`<shell> -c <script>`).
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Whether string and argv operands fail the pipeline on non-zero exit.
    #[serde(default)]
    pub check_inline: bool,

    /// Whether inline commands capture stderr instead of inheriting it.
    #[serde(default = "default_capture")]
    pub capture: bool,

    /// Maximum number of concurrently running background tasks.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Whether failures inside function stages fail `Pipeline::close`.
    #[serde(default)]
    pub raise_function_errors: bool,
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_capture() -> bool {
    true
}

fn default_worker_threads() -> usize {
    10
}

impl Default for ShrimpConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            check_inline: false,
            capture: default_capture(),
            worker_threads: default_worker_threads(),
            raise_function_errors: false,
        }
    }
}

impl ShrimpConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "shrimp")
            .context("Could not determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ShrimpConfig::default();
        assert_eq!(config.shell, "/bin/sh");
        assert!(!config.check_inline);
        assert!(config.capture);
        assert_eq!(config.worker_threads, 10);
        assert!(!config.raise_function_errors);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shell = \"/bin/bash\"\ncheck_inline = true").unwrap();

        let config = ShrimpConfig::load_from(file.path()).unwrap();
        assert_eq!(config.shell, "/bin/bash");
        assert!(config.check_inline);
        assert!(config.capture);
        assert_eq!(config.worker_threads, 10);
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_threads = \"many\"").unwrap();

        let err = ShrimpConfig::load_from(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn missing_file_is_an_error_when_explicit() {
        let result = ShrimpConfig::load_from(Path::new("/definitely/not/here.toml"));
        assert!(result.is_err());
    }
}
