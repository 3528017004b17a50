//! Startup configuration.
//!
//! Loaded once from TOML, validated, then passed by reference into the
//! assembler. Every field has a default so an empty file is a valid config.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::middleware::CorsConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8001").
    pub bind_address: String,

    /// SQLite database file.
    pub database_path: PathBuf,

    /// Cross-origin policy.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8001".to_string(),
            database_path: PathBuf::from("games.db"),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The parsed bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.bind_address.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.cors.validate()
    }
}
