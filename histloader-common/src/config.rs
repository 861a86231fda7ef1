//! Configuration loading for histloader services
//!
//! Config file path resolution follows the priority order used across the
//! project:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`HISTLOADER_CONFIG`)
//! 3. Platform config directory (`<config_dir>/histloader/config.toml`)
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming a config file path
pub const CONFIG_ENV_VAR: &str = "HISTLOADER_CONFIG";

/// Ingest service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Base URL of the time-series store
    pub store_url: String,

    /// Request-level timeout for store calls, in milliseconds
    pub store_timeout_ms: u64,

    /// Maximum points per push chunk
    pub chunk_size: usize,

    /// Number of worker tasks in the ingestion pool
    pub workers: usize,

    /// Capacity of the bounded work queue; submissions beyond this are rejected
    pub queue_capacity: usize,

    /// Retries after the initial identifier-resolution attempt
    pub resolver_retries: u32,

    /// Fixed delay between identifier-resolution attempts, in milliseconds
    pub resolver_delay_ms: u64,

    /// Path of the durable session snapshot file
    pub session_store_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:8701".to_string(),
            store_timeout_ms: 30_000,
            chunk_size: 5_000,
            workers: 4,
            queue_capacity: 64,
            resolver_retries: 6,
            resolver_delay_ms: 5_000,
            session_store_path: PathBuf::from("sessions.json"),
        }
    }
}

impl IngestConfig {
    /// Parse a TOML config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve and load configuration following the project priority order.
    ///
    /// A config file named explicitly (CLI or environment) must exist and
    /// parse; an absent file in the platform config directory is not an
    /// error and yields compiled defaults.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            info!("Loading configuration from {} (command line)", path.display());
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!("Loading configuration from {} ({})", path, CONFIG_ENV_VAR);
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                info!("Loading configuration from {}", path.display());
                return Self::from_file(&path);
            }
        }

        warn!("No config file found, using compiled defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be > 0".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Default config file location: `<platform config dir>/histloader/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("histloader").join("config.toml"))
}
