//! cascade.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Port the collector's OTLP gRPC receiver listens on by default.
pub const DEFAULT_OTLP_PORT: u16 = 4317;

/// Port the collector's health-check extension listens on by default.
pub const DEFAULT_HEALTH_PORT: u16 = 13133;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub instance: String,
    pub namespace: String,
    pub service: String,
    pub app_name: String,
    /// Comma-separated `host:port` list of candidate collectors.
    pub endpoint: String,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub default_port: u16,
    pub shutdown_timeout_secs: u64,
    pub health: HealthProbeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthProbeConfig {
    pub port: u16,
    pub path: String,
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            instance: "unknown".to_string(),
            namespace: "unknown".to_string(),
            service: "unknown".to_string(),
            app_name: "unknown".to_string(),
            endpoint: String::new(),
            timeout_secs: 60,
            interval_secs: 30,
            default_port: DEFAULT_OTLP_PORT,
            shutdown_timeout_secs: 5,
            health: HealthProbeConfig::default(),
        }
    }
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HEALTH_PORT,
            path: "/status".to_string(),
            initial_delay_secs: 1,
            interval_secs: 10,
            timeout_secs: 2,
        }
    }
}

impl CollectorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CollectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the export engine cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be > 0".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be > 0".to_string()));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health.interval_secs must be > 0".to_string(),
            ));
        }
        for entry in self.endpoints() {
            split_host_port(entry)?;
        }
        Ok(())
    }

    /// Non-empty, trimmed entries of the endpoint list, in configured order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoint
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl HealthProbeConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Split `host:port` into its parts. The port is `None` when absent.
///
/// Bracketed IPv6 hosts (`[::1]:4317`) keep their brackets in the host part.
pub fn split_host_port(entry: &str) -> ConfigResult<(&str, Option<u16>)> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(ConfigError::InvalidEndpoint(entry.to_string()));
    }

    let split = if entry.starts_with('[') {
        match entry.find(']') {
            Some(end) if end + 1 == entry.len() => None,
            Some(end) if entry[end + 1..].starts_with(':') => Some(end + 1),
            _ => return Err(ConfigError::InvalidEndpoint(entry.to_string())),
        }
    } else if entry.matches(':').count() > 1 {
        // IPv6 literals must be bracketed.
        return Err(ConfigError::InvalidEndpoint(entry.to_string()));
    } else {
        entry.rfind(':')
    };

    match split {
        None => Ok((entry, None)),
        Some(idx) => {
            let host = &entry[..idx];
            let port = entry[idx + 1..]
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidEndpoint(entry.to_string()))?;
            if host.is_empty() {
                return Err(ConfigError::InvalidEndpoint(entry.to_string()));
            }
            Ok((host, Some(port)))
        }
    }
}
