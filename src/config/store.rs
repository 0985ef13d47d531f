//! Backing store configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which counter store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Shared Redis instance; required for more than one process
    #[default]
    Redis,
    /// Process-local counters for development and tests
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

/// Counter store configuration
///
/// # Example
///
/// ```toml
/// [store]
/// backend = "redis"
/// url = "redis://127.0.0.1:6379"
/// key_prefix = "tokengate:"
/// timeout_ms = 250
/// reservation_ttl_hours = 48
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    /// Prefix for every key written to the store
    pub key_prefix: String,
    /// Per round-trip timeout; expiry counts as a store failure
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Lifetime of counters and unresolved reservations
    pub reservation_ttl_hours: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "tokengate:".to_string(),
            timeout_ms: 250,
            connect_timeout_ms: 1000,
            reservation_ttl_hours: 48,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_hours * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, StoreBackend::Redis);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.reservation_ttl(), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("REDIS".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert!("etcd".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_store_config_toml() {
        let config: StoreConfig = toml::from_str("backend = \"memory\"\ntimeout_ms = 100").unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.key_prefix, "tokengate:");
    }
}
