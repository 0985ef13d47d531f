//! Policy error types

use crate::scope::ScopeType;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, validating, or evaluating a budget policy
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Policy file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse policy: {0}")]
    Parse(String),

    #[error("Invalid policy value for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Policy has no entry for scope type '{0}' and no default section")]
    MissingScopeType(ScopeType),

    #[error("No budget policy covers scope '{scope}'")]
    NotFound { scope: String },
}
