//! Configuration module for tokengate
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`TOKENGATE_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! Enforcement mode and policy path are read once at startup. There is no
//! runtime reconfiguration of the mode.
//!
//! # Example
//!
//! ```rust
//! use tokengate::config::TokengateConfig;
//!
//! let toml = r#"
//! [store]
//! backend = "memory"
//!
//! [enforcement]
//! environment = "development"
//! "#;
//! let config: TokengateConfig = toml::from_str(toml).unwrap();
//! assert_eq!(config.server.port, 8300);
//! ```

pub mod enforcement;
pub mod error;
pub mod logging;
pub mod server;
pub mod store;

pub use enforcement::{EnforcementConfig, EnforcementMode, Environment};
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use server::ServerConfig;
pub use store::{StoreBackend, StoreConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unified configuration for the tokengate service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TokengateConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Counter store connection settings
    pub store: StoreConfig,
    /// Enforcement mode, environment, and policy location
    pub enforcement: EnforcementConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl TokengateConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supports TOKENGATE_* environment variables for common settings.
    /// Invalid values are ignored (file/default values are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("TOKENGATE_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("TOKENGATE_HOST") {
            self.server.host = host;
        }

        if let Ok(level) = std::env::var("TOKENGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TOKENGATE_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }

        if let Ok(backend) = std::env::var("TOKENGATE_STORE") {
            if let Ok(b) = backend.parse() {
                self.store.backend = b;
            }
        }
        if let Ok(url) = std::env::var("TOKENGATE_REDIS_URL") {
            self.store.url = url;
        }

        if let Ok(env) = std::env::var("TOKENGATE_ENV") {
            if let Ok(e) = env.parse() {
                self.enforcement.environment = e;
            }
        }
        if let Ok(mode) = std::env::var("TOKENGATE_ENFORCEMENT") {
            if let Ok(m) = mode.parse() {
                self.enforcement.mode = Some(m);
            }
        }
        if let Ok(path) = std::env::var("TOKENGATE_POLICY_PATH") {
            self.enforcement.policy_path = Some(PathBuf::from(path));
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation {
                field: "server.port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }

        if self.store.backend == StoreBackend::Redis && self.store.url.is_empty() {
            return Err(ConfigError::Validation {
                field: "store.url".to_string(),
                message: "URL cannot be empty for the redis backend".to_string(),
            });
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "store.timeout_ms".to_string(),
                message: "timeout must be non-zero".to_string(),
            });
        }
        if self.store.reservation_ttl_hours == 0 {
            return Err(ConfigError::Validation {
                field: "store.reservation_ttl_hours".to_string(),
                message: "reservations must expire after at least one hour".to_string(),
            });
        }

        // A multi-process fleet cannot share process-local counters
        if self.store.backend == StoreBackend::Memory
            && self.enforcement.environment == Environment::Production
            && self.enforcement.effective_mode() != EnforcementMode::Disabled
        {
            tracing::warn!("Memory store in production: budgets are enforced per process only");
        }

        Ok(())
    }
}
