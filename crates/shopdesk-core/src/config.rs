//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! environment selection (which decides the API base URL), session timing,
//! the storage back end and the last used login.
//!
//! Configuration is stored at `~/.config/shopdesk/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileStore, KeyValueStore, KeyringStore, MemoryStore, SessionConfig};

/// Application name used for config/data directory paths
const APP_NAME: &str = "shopdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API origin used outside production.
pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:8000";

/// Path of the API under the production origin.
const PRODUCTION_API_PATH: &str = "/api";

/// Environment variable selecting the environment
pub const ENV_VAR: &str = "SHOPDESK_ENV";

/// Environment variable overriding the production origin
pub const ORIGIN_VAR: &str = "SHOPDESK_API_ORIGIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    /// Origin serving the app in production, e.g. `https://shop.example.com`.
    pub api_origin: Option<String>,
    pub renew_interval_secs: u64,
    pub expiry_threshold_secs: u64,
    pub request_timeout_secs: u64,
    pub storage: StorageBackend,
    pub last_email: Option<String>,
    pub last_tenant_slug: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            api_origin: None,
            renew_interval_secs: 30,
            expiry_threshold_secs: 60,
            request_timeout_secs: 30,
            storage: StorageBackend::default(),
            last_email: None,
            last_tenant_slug: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay environment variables on top of the file values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(env) = lookup(ENV_VAR).as_deref().and_then(Environment::parse) {
            self.environment = env;
        }
        if let Some(origin) = lookup(ORIGIN_VAR).filter(|o| !o.trim().is_empty()) {
            self.api_origin = Some(origin);
        }
    }

    /// Base URL for both the Auth Service and the Resource API.
    ///
    /// Production resolves to `/api` under the configured origin (a bare
    /// relative `/api` when no origin is set); anything else uses the local
    /// development server.
    pub fn base_url(&self) -> String {
        match self.environment {
            Environment::Production => {
                let origin = self.api_origin.as_deref().unwrap_or("").trim_end_matches('/');
                format!("{}{}", origin, PRODUCTION_API_PATH)
            }
            Environment::Development => DEVELOPMENT_BASE_URL.to_string(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            renew_interval: Duration::from_secs(self.renew_interval_secs.max(1)),
            expiry_threshold: Duration::from_secs(self.expiry_threshold_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Open the configured session storage.
    pub fn open_storage(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStore::new(&Self::data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStore::new(APP_NAME)),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}
