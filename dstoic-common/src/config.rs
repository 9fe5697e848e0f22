//! Configuration file location and store settings
//!
//! Settings resolve in priority order:
//! 1. Command-line argument
//! 2. Environment variable (clap `env` on the binaries)
//! 3. TOML config file
//! 4. OS-dependent compiled default

use crate::store::DEFAULT_BLOB_NAME;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DSTOIC_CONFIG";

/// Directory name under the platform config/data directories
pub const APP_DIR: &str = "dstoic";

pub const DEFAULT_DATABASE_FILE: &str = "quotes.db";

/// Which Quote Store backend a deployment uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Document,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Document => "document",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "document" => Ok(StoreBackend::Document),
            other => Err(Error::Config(format!(
                "unknown store backend '{}' (expected 'sqlite' or 'document')",
                other
            ))),
        }
    }
}

/// `[store]` table of the TOML file; every key optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: Option<StoreBackend>,
    pub database_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub blob_name: Option<String>,
}

/// Resolved store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file (relational backend)
    pub database_path: PathBuf,
    /// Directory acting as the blob bucket (document backend)
    pub data_dir: PathBuf,
    pub blob_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            backend: StoreBackend::default(),
            database_path: data_dir.join(DEFAULT_DATABASE_FILE),
            data_dir,
            blob_name: DEFAULT_BLOB_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    /// Layer command-line/environment values over the file section
    pub fn resolve(overrides: &StoreSection, file: &StoreSection) -> Self {
        let defaults = StoreConfig::default();
        Self {
            backend: overrides
                .backend
                .or(file.backend)
                .unwrap_or(defaults.backend),
            database_path: overrides
                .database_path
                .clone()
                .or_else(|| file.database_path.clone())
                .unwrap_or(defaults.database_path),
            data_dir: overrides
                .data_dir
                .clone()
                .or_else(|| file.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            blob_name: overrides
                .blob_name
                .clone()
                .or_else(|| file.blob_name.clone())
                .unwrap_or(defaults.blob_name),
        }
    }

    /// Resource the configured backend reads, for log lines
    pub fn resource(&self) -> String {
        match self.backend {
            StoreBackend::Sqlite => self.database_path.display().to_string(),
            StoreBackend::Document => self.data_dir.join(&self.blob_name).display().to_string(),
        }
    }
}

/// Locate the TOML config file
///
/// An explicitly named file (argument or `DSTOIC_CONFIG`) must exist. The
/// platform default is optional: `Ok(None)` when absent.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return require_file(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return require_file(PathBuf::from(path));
        }
    }

    Ok(default_config_candidates().into_iter().find(|p| p.is_file()))
}

fn require_file(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.is_file() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("config.toml"))
        .into_iter()
        .collect();
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc").join(APP_DIR).join("config.toml"));
    }
    candidates
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let parsed = toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(parsed)
}

/// Locate and parse the config file, or `T::default()` when there is none
pub fn load_config_or_default<T: DeserializeOwned + Default>(cli_arg: Option<&Path>) -> Result<T> {
    match locate_config_file(cli_arg)? {
        Some(path) => load_toml(&path),
        None => {
            debug!("No config file found, using defaults");
            Ok(T::default())
        }
    }
}

/// OS-dependent default data directory
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        // ~/Library/Application Support/dstoic
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(APP_DIR))
    } else {
        // ~/.local/share/dstoic, %LOCALAPPDATA%\dstoic
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("./dstoic_data"))
    }
}
