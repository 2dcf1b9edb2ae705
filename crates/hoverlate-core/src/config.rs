//! Process-level configuration for Hoverlate.
//!
//! Per-user options (API key, model, prompts) live in the durable store as
//! [`crate::settings::Settings`]; this file only holds what the host
//! process needs before it can open that store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HoverlateError, Result};
use crate::limiter::RateLimitConfig;
use crate::orchestrator::{BatchMode, OrchestratorOptions};

/// Top-level Hoverlate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoverlateConfig {
    /// Gemini API base URL (None = public endpoint).
    pub api_base: Option<String>,

    /// Where the store database and logs live (None = platform data dir).
    pub data_dir: Option<PathBuf>,

    /// Tracing filter directive, overridden by `RUST_LOG`.
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub batch: BatchSettings,
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3817
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub mode: BatchMode,
}

impl HoverlateConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HoverlateError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| HoverlateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HoverlateError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hoverlate")
            .join("config.toml")
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hoverlate")
        })
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            rate_limit: self.rate_limit.clone(),
            batch_mode: self.batch.mode,
        }
    }
}
