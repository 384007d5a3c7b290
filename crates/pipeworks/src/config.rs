//! Runtime configuration — listen mode, database, CLI overrides.
//!
//! Loaded via TOML+serde the way `shipper-cli` loads its own
//! settings file, rather than hand-parsing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// `listenMode.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenModeKind {
    Http,
    Https,
    Unix,
}

/// `listenMode = {mode, address, port, cert, certKey}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenMode {
    pub mode: ListenModeKind,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default, rename = "cert_key")]
    pub cert_key: Option<PathBuf>,
}

impl Default for ListenMode {
    fn default() -> Self {
        Self {
            mode: ListenModeKind::Http,
            address: "0.0.0.0".to_string(),
            port: 8080,
            cert: None,
            cert_key: None,
        }
    }
}

/// `database = {...}`. The backend technology is out of scope
///; this carries only what a `Store` implementation needs to
/// connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

/// Top-level runtime configuration file (default path `./conf/runtime.conf`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub listen: ListenMode,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl RuntimeConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Definition(format!("reading config {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| PipelineError::Definition(format!("parsing config {}: {e}", path.display())))
    }

    /// Apply CLI flag overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(address) = &overrides.address {
            self.listen.address = address.clone();
        }
        if let Some(port) = overrides.port {
            self.listen.port = port;
        }
    }
}

/// CLI-supplied overrides for [`RuntimeConfig::apply_overrides`].
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub address: Option<String>,
    pub port: Option<u16>,
}
