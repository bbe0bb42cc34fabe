//! Configuration for the metadata store client and the reference service.

use crate::error::{Result, StoreError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which store implementation to open.
    pub backend: BackendKind,
    /// Remote metadata service client settings.
    pub remote: RemoteConfig,
    /// Reference service settings.
    pub service: ServiceConfig,
    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            StoreError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Remote {
            let url = Url::parse(&self.remote.endpoint).map_err(|e| StoreError::InvalidConfig {
                field: "remote.endpoint".to_string(),
                reason: format!("Not an absolute URL: {}", e),
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(StoreError::InvalidConfig {
                    field: "remote.endpoint".to_string(),
                    reason: format!("Unsupported scheme {}", url.scheme()),
                });
            }
        }

        check_prefix("remote.api_prefix", &self.remote.api_prefix)?;
        check_prefix("service.api_prefix", &self.service.api_prefix)?;

        if self.remote.connect_timeout.is_zero() {
            return Err(StoreError::InvalidConfig {
                field: "remote.connect_timeout".to_string(),
                reason: "Timeout must be non-zero".to_string(),
            });
        }

        if self.remote.request_timeout.is_zero() {
            return Err(StoreError::InvalidConfig {
                field: "remote.request_timeout".to_string(),
                reason: "Timeout must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a development configuration: local service, debug logs.
    pub fn development() -> Self {
        Self {
            backend: BackendKind::Remote,
            remote: RemoteConfig {
                endpoint: "http://127.0.0.1:8089".to_string(),
                connect_timeout: Duration::from_secs(1),
                request_timeout: Duration::from_secs(5),
                ..RemoteConfig::default()
            },
            service: ServiceConfig {
                bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8089)),
                ..ServiceConfig::default()
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..ObservabilityConfig::default()
            },
        }
    }
}

fn check_prefix(field: &str, prefix: &str) -> Result<()> {
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        return Err(StoreError::InvalidConfig {
            field: field.to_string(),
            reason: "Prefix must be empty or start with '/' and not end with '/'".to_string(),
        });
    }
    Ok(())
}

/// Store implementation selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote metadata service over HTTP.
    #[default]
    Remote,
    /// In-process store that keeps nothing.
    Local,
}

/// Remote metadata service client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the metadata service.
    pub endpoint: String,
    /// Path prefix of every API route.
    pub api_prefix: String,
    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8089".to_string(),
            api_prefix: "/api".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Reference metadata service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Path prefix of every API route.
    pub api_prefix: String,
    /// Lowest value the service oracle may issue.
    pub tso_start: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8089)),
            api_prefix: "/api".to_string(),
            tso_start: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for durations written as "500ms", "5s" or "1m".
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit_ms) = if let Some(v) = s.strip_suffix("ms") {
            (v, 1)
        } else if let Some(v) = s.strip_suffix('s') {
            (v, 1_000)
        } else if let Some(v) = s.strip_suffix('m') {
            (v, 60_000)
        } else {
            (s, 1)
        };
        let value = digits.trim().parse::<u64>().map_err(|e| e.to_string())?;
        value
            .checked_mul(unit_ms)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration {} overflows", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Remote);
        assert_eq!(config.remote.api_prefix, "/api");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = StoreConfig::development();
        assert_eq!(config.service.bind_addr.port(), 8089);
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        use humantime_serde::parse_duration;
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreConfig::default();
        config.remote.endpoint = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig { ref field, .. }) if field == "remote.endpoint"
        ));

        // the endpoint is ignored for the local backend
        config.backend = BackendKind::Local;
        assert!(config.validate().is_ok());

        config.service.api_prefix = "api/".to_string();
        assert!(config.validate().is_err());
        config.service.api_prefix = String::new();
        config.remote.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backend":"local","remote":{{"request_timeout":"2s"}},"observability":{{"json_logs":true}}}}"#
        )
        .unwrap();
        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.remote.request_timeout, Duration::from_secs(2));
        assert_eq!(config.remote.connect_timeout, Duration::from_secs(5));
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        assert!(matches!(
            StoreConfig::from_file(file.path()),
            Err(StoreError::Config(_))
        ));
    }
}
