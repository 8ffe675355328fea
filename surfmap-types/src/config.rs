use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the reconnaissance pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconConfig {
    pub enable_scanning: bool,
    pub enable_streaming: bool,
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
    pub verbose: bool,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            enable_scanning: true,
            enable_streaming: true,
            default_timeout: Duration::from_secs(600),
            verbose: false,
        }
    }
}

/// Options for one reconnaissance run.
#[derive(Debug, Clone)]
pub struct ReconOptions {
    pub hosts: Vec<String>,
    pub enable_scanning: bool,
    /// Deadline for the whole run; zero disables the deadline.
    pub timeout: Duration,
}

impl ReconOptions {
    pub fn from_config(hosts: Vec<String>, config: &ReconConfig) -> Self {
        Self {
            hosts,
            enable_scanning: config.enable_scanning,
            timeout: config.default_timeout,
        }
    }
}

/// Configuration for the Lua scan engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Directory to load `*.lua` scripts from.
    pub scripts_dir: String,
    /// Pool size for parallel asset scans (scan-all path).
    pub max_concurrent: usize,
    /// Per-script execution deadline.
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
    /// Bounded worker pool gating concurrent script executions.
    pub worker_pool_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scripts_dir: "./scripts".into(),
            max_concurrent: 10,
            default_timeout: Duration::from_secs(300),
            worker_pool_size: 5,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recon_defaults() {
        let config = ReconConfig::default();
        assert!(config.enable_scanning);
        assert!(config.enable_streaming);
        assert_eq!(config.default_timeout, Duration::from_secs(600));
    }

    #[test]
    fn scanner_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.worker_pool_size, 5);
        assert_eq!(config.default_timeout, Duration::from_secs(300));
    }

    #[test]
    fn options_inherit_config() {
        let config = ReconConfig {
            enable_scanning: false,
            ..Default::default()
        };
        let opts = ReconOptions::from_config(vec!["example.com".into()], &config);
        assert!(!opts.enable_scanning);
        assert_eq!(opts.hosts, vec!["example.com"]);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = ScannerConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_timeout"], 300);
        let parsed: ScannerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.default_timeout, Duration::from_secs(300));
    }
}
