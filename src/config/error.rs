//! Errors raised while assembling a runnable service from configuration

use crate::policy::PolicyError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Production with enforcement on, but no `enforcement.policy_path`
    #[error("enforcement.policy_path is required in production unless enforcement is disabled")]
    PolicyRequired,

    #[error("Failed to load budget policy {path}")]
    Policy {
        path: PathBuf,
        #[source]
        source: PolicyError,
    },

    #[error("Failed to set up {backend} counter store")]
    Store {
        backend: &'static str,
        #[source]
        source: StoreError,
    },
}
