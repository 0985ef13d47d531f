//! Backing store error types

use thiserror::Error;

/// Failures talking to the counter store.
///
/// None of these are budget decisions; the engine hands them to the
/// degradation policy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("store {operation} failed: {message}")]
    Command {
        operation: &'static str,
        message: String,
    },

    #[error("unexpected store reply to {operation}: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    #[error("reservation id '{0}' already exists")]
    DuplicateReservation(String),
}

impl StoreError {
    pub(crate) fn from_redis(operation: &'static str, err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else if err.is_timeout() {
            StoreError::Timeout {
                operation,
                timeout_ms: 0,
            }
        } else {
            StoreError::Command {
                operation,
                message: err.to_string(),
            }
        }
    }
}
