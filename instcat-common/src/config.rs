//! Bootstrap configuration and root folder resolution
//!
//! Root folder resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `INSTCAT_ROOT_FOLDER`
//! 3. TOML config file `root_folder` key
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never stops startup: the resolver logs a
//! warning and falls through to the next source.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "INSTCAT_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "instcat.db";

/// Bootstrap configuration loaded from TOML
///
/// Only bootstrap concerns live here. Service-specific sections in the same
/// file are parsed by the owning service and ignored by this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load bootstrap TOML config from `path`
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    Ok(Some(config))
}

/// Resolves the root folder for a service
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            config_file: None,
        }
    }

    /// Root folder given on the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Explicit TOML file to consult instead of the default location
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Default TOML location: `<config dir>/instcat/<module>.toml`
    pub fn default_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("instcat").join(format!("{}.toml", self.module_name)))
    }

    /// Resolve the root folder following the priority order
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(path = %path.display(), "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(path = %path, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        let config_path = self.config_file.clone().or_else(|| self.default_config_path());
        if let Some(config_path) = config_path {
            match load_toml_config(&config_path) {
                Ok(Some(TomlConfig { root_folder: Some(root), .. })) => {
                    debug!(path = %root.display(), "Root folder from TOML config");
                    return root;
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring unreadable config {}: {}", config_path.display(), e),
            }
        }

        default_root_folder()
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("instcat"))
        .unwrap_or_else(|| PathBuf::from("./instcat_data"))
}

/// Prepares a resolved root folder for use
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder (and parents) if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Service config file kept alongside the database
    pub fn config_path(&self, module_name: &str) -> PathBuf {
        self.root_folder.join(format!("{}.toml", module_name))
    }
}
