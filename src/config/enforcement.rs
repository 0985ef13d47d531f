//! Budget enforcement configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment; picks defaults for enforcement and policy strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// What to do when budgets are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforcementMode {
    /// Enforce; store failures reject requests (fail-closed)
    Strict,
    /// Enforce; store failures let requests through unmetered
    FailOpen,
    /// Never consult the store
    Disabled,
}

impl FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" | "fail-closed" => Ok(EnforcementMode::Strict),
            "fail-open" => Ok(EnforcementMode::FailOpen),
            "disabled" => Ok(EnforcementMode::Disabled),
            _ => Err(format!("Invalid enforcement mode: {}", s)),
        }
    }
}

/// Enforcement configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnforcementConfig {
    pub environment: Environment,

    /// Explicit mode; when unset, production is strict and development is fail-open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<EnforcementMode>,

    /// Budget policy document (JSON or TOML)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,
}

impl EnforcementConfig {
    /// Mode after applying environment defaults
    pub fn effective_mode(&self) -> EnforcementMode {
        self.mode.unwrap_or(match self.environment {
            Environment::Production => EnforcementMode::Strict,
            Environment::Development => EnforcementMode::FailOpen,
        })
    }
}
