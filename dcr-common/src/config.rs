//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration is minimal: the root folder (which holds `dcr.db`),
//! logging, and optional `[engine]` overrides. Runtime engine settings are
//! resolved by the engine crate with Database → ENV → TOML → default priority.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "DCR_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "dcr.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine setting overrides (lowest priority after compiled defaults)
    #[serde(default)]
    pub engine: EngineToml,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
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

/// `[engine]` section of the TOML file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineToml {
    pub review_threshold: Option<u8>,
    pub worker_count: Option<usize>,
    pub staleness_window_minutes: Option<i64>,
    pub target_channel: Option<String>,
    pub knowledge_cache_capacity: Option<usize>,
    pub db_max_lock_wait_ms: Option<u64>,
}

/// Root folder resolution
///
/// Priority order:
/// 1. Command-line argument (highest priority)
/// 2. `DCR_ROOT_FOLDER` environment variable
/// 3. TOML config file `root_folder`
/// 4. OS-dependent compiled default (fallback)
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Use an explicit command-line value (highest priority)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Resolve the root folder. Never fails: falls back to the compiled default.
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(module = %self.module_name, "Root folder from environment");
                return PathBuf::from(path);
            }
        }

        if let Some(path) = default_config_path() {
            match load_toml_config(&path) {
                Ok(Some(config)) => {
                    if let Some(root) = config.root_folder {
                        debug!(module = %self.module_name, "Root folder from TOML config");
                        return root;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(module = %self.module_name, error = %e, "Ignoring unreadable TOML config");
                }
            }
        }

        default_root_folder()
    }
}

/// Creates the root folder on first start and locates the database in it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Load the TOML config file.
///
/// A missing file is not an error (`Ok(None)`): the service starts with defaults.
pub fn load_toml_config(path: &Path) -> Result<Option<TomlConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    Ok(Some(config))
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `~/.config/dcr/config.toml` (platform equivalent elsewhere)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dcr").join("config.toml"))
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("dcr"))
        .unwrap_or_else(|| PathBuf::from("./dcr_data"))
}
