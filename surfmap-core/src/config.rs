use std::time::Duration;

use serde::{Deserialize, Serialize};
use surfmap_types::{ReconConfig, ScannerConfig};

use crate::error::CoreError;

/// File storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: "./data".into() }
    }
}

/// Full application configuration, assembled from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub scanner: ScannerConfig,
    pub recon: ReconConfig,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults, then validate it.
    pub fn from_env() -> Result<Self, CoreError> {
        let config = Self {
            storage: StorageConfig {
                data_dir: env_string("STORAGE_DATA_DIR", "./data"),
            },
            scanner: ScannerConfig {
                scripts_dir: env_string("SCANNER_SCRIPTS_DIR", "./scripts"),
                max_concurrent: env_usize("SCANNER_MAX_CONCURRENT", 10),
                default_timeout: Duration::from_secs(env_u64("SCANNER_DEFAULT_TIMEOUT_SECS", 300)),
                worker_pool_size: env_usize("SCANNER_WORKER_POOL_SIZE", 5),
            },
            recon: ReconConfig {
                enable_scanning: env_bool("RECON_ENABLE_SCANNING", true),
                enable_streaming: env_bool("RECON_ENABLE_STREAMING", true),
                default_timeout: Duration::from_secs(env_u64("RECON_DEFAULT_TIMEOUT_SECS", 600)),
                verbose: env_bool("RECON_VERBOSE", false),
            },
            log_level: LogLevel::parse(&env_string("LOG_LEVEL", "info"))
                .ok_or_else(|| CoreError::Validation("invalid LOG_LEVEL".into()))?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.storage.data_dir.is_empty() {
            return Err(CoreError::Validation("storage data_dir cannot be empty".into()));
        }
        if self.scanner.max_concurrent == 0 {
            return Err(CoreError::Validation("scanner max_concurrent must be at least 1".into()));
        }
        if self.scanner.worker_pool_size == 0 {
            return Err(CoreError::Validation(
                "scanner worker_pool_size must be at least 1".into(),
            ));
        }
        if self.recon.default_timeout.is_zero() {
            return Err(CoreError::Validation("recon default_timeout must be positive".into()));
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
