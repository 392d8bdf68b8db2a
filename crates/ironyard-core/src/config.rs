//! Scheduler configuration parser (TOML).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduler drivers this build knows how to construct.
pub const KNOWN_DRIVERS: &[&str] = &["filter_scheduler"];

/// Weight handlers this build knows how to construct.
pub const KNOWN_WEIGHT_HANDLERS: &[&str] = &["ordered"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub scheduler: SchedulerSection,
    pub placement: PlacementSection,
    pub rpc: RpcSection,
    pub seed: SeedSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Scheduler driver implementation selector.
    pub driver: String,
    /// Attempts allowed per request; 1 disables rescheduling.
    pub max_attempts: u32,
    pub default_filters: Vec<String>,
    pub default_weighers: Vec<String>,
    /// Weigher selection strategy.
    pub weight_handler: String,
    /// Multiplier applied to the port-count weigher. Negative prefers fewer ports.
    pub port_weight_multiplier: f64,
    /// How often the node cache is rebuilt (e.g. "60s").
    pub node_refresh_interval: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            driver: "filter_scheduler".to_string(),
            max_attempts: 3,
            default_filters: vec![
                "AvailabilityZoneFilter".to_string(),
                "NodeTypeFilter".to_string(),
                "CapabilitiesFilter".to_string(),
                "PortsFilter".to_string(),
            ],
            default_weighers: vec!["PortWeigher".to_string()],
            weight_handler: "ordered".to_string(),
            port_weight_multiplier: -1.0,
            node_refresh_interval: "60s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSection {
    /// Base URL of the placement service.
    pub endpoint: String,
    /// Static token sent as `X-Auth-Token`, if set.
    pub auth_token: Option<String>,
    /// Per-request timeout (e.g. "10s").
    pub timeout: String,
}

impl Default for PlacementSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8778".to_string(),
            auth_token: None,
            timeout: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub listen: String,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6385".to_string(),
        }
    }
}

/// Optional file-seeded collaborators for running without a bare-metal driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedSection {
    /// JSON array of node states.
    pub nodes: Option<PathBuf>,
    /// JSON document of aggregates, server groups and server zones.
    pub catalog: Option<PathBuf>,
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot be used.
    ///
    /// Filter and weigher names are checked by the scheduler's registries,
    /// which own the set of known implementations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "scheduler.max_attempts must be at least 1".to_string(),
            ));
        }
        if !KNOWN_DRIVERS.contains(&s.driver.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown scheduler driver: {}",
                s.driver
            )));
        }
        if !KNOWN_WEIGHT_HANDLERS.contains(&s.weight_handler.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unknown weight handler: {}",
                s.weight_handler
            )));
        }
        if !s.port_weight_multiplier.is_finite() {
            return Err(ConfigError::Invalid(
                "scheduler.port_weight_multiplier must be finite".to_string(),
            ));
        }
        self.node_refresh_interval()?;
        self.placement_timeout()?;
        Ok(())
    }

    pub fn node_refresh_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.scheduler.node_refresh_interval).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "bad duration for scheduler.node_refresh_interval: {}",
                self.scheduler.node_refresh_interval
            ))
        })
    }

    pub fn placement_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.placement.timeout).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "bad duration for placement.timeout: {}",
                self.placement.timeout
            ))
        })
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.scheduler.driver, "filter_scheduler");
        assert_eq!(config.scheduler.default_weighers, vec!["PortWeigher"]);
        assert_eq!(config.scheduler.port_weight_multiplier, -1.0);
        assert_eq!(config.placement.auth_token, None);
    }

    #[test]
    fn parses_scheduler_section() {
        let toml_str = r#"
[scheduler]
max_attempts = 1
default_filters = ["AvailabilityZoneFilter"]
port_weight_multiplier = 2.5

[placement]
endpoint = "http://placement:8778"
auth_token = "secret"
"#;
        let config = SchedulerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_attempts, 1);
        assert_eq!(config.scheduler.default_filters, vec!["AvailabilityZoneFilter"]);
        assert_eq!(config.scheduler.port_weight_multiplier, 2.5);
        assert_eq!(config.placement.endpoint, "http://placement:8778");
        assert_eq!(config.placement.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = SchedulerConfig::from_toml_str("[scheduler]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_driver() {
        let err =
            SchedulerConfig::from_toml_str("[scheduler]\ndriver = \"chance\"").unwrap_err();
        assert!(err.to_string().contains("chance"));
    }

    #[test]
    fn rejects_unknown_weight_handler() {
        let err = SchedulerConfig::from_toml_str("[scheduler]\nweight_handler = \"random\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_durations() {
        let err = SchedulerConfig::from_toml_str("[placement]\ntimeout = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("placement.timeout"));
    }

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }
}
