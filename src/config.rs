//! Server configuration
//!
//! Loaded from an optional JSON file; every field has a default so an empty
//! object is a valid config. Command-line flags override file values.

use crate::error::{CheckVaultError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CheckVault server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub aof_path: PathBuf,
    pub max_connections: usize,
    /// Longest accepted command line, and the most unterminated input kept
    /// per connection.
    pub max_line_length: usize,
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:6379".to_string(),
            aof_path: PathBuf::from("checkpoints.aof"),
            max_connections: 1024,
            max_line_length: 64 * 1024,
            write_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(CheckVaultError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(CheckVaultError::Config(
                "max_line_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
