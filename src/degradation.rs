//! Degradation policy
//!
//! Decides what happens when enforcement cannot run normally: the counter
//! store is unreachable, or the loaded policy has no limit for a scope.
//! Chosen once at startup from [`EnforcementConfig`] and fixed for the life
//! of the process, so every replica in a fleet behaves the same way.

use crate::config::{EnforcementConfig, EnforcementMode, Environment};
use crate::policy::PolicyStrictness;
use serde::Serialize;

/// Reaction to a store failure during reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailureAction {
    /// Fail-closed: the request does not proceed
    Reject,
    /// Fail-open: hand out a synthetic token and let the work run unmetered
    Bypass,
}

/// Reaction to a scope with no policy entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicyAction {
    Reject,
    /// Count usage on the scope but never block on it
    Unlimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegradationPolicy {
    mode: EnforcementMode,
    environment: Environment,
}

impl DegradationPolicy {
    pub fn new(mode: EnforcementMode, environment: Environment) -> Self {
        Self { mode, environment }
    }

    pub fn from_config(config: &EnforcementConfig) -> Self {
        Self::new(config.effective_mode(), config.environment)
    }

    /// Fail-closed production defaults
    pub fn fail_closed() -> Self {
        Self::new(EnforcementMode::Strict, Environment::Production)
    }

    /// Fail-open development defaults
    pub fn fail_open() -> Self {
        Self::new(EnforcementMode::FailOpen, Environment::Development)
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Whether the store is consulted at all
    pub fn enforces(&self) -> bool {
        self.mode != EnforcementMode::Disabled
    }

    pub fn on_reserve_store_error(&self) -> StoreFailureAction {
        match self.mode {
            EnforcementMode::Strict => StoreFailureAction::Reject,
            EnforcementMode::FailOpen | EnforcementMode::Disabled => StoreFailureAction::Bypass,
        }
    }

    pub fn on_missing_policy(&self) -> MissingPolicyAction {
        match self.environment {
            Environment::Production => MissingPolicyAction::Reject,
            Environment::Development => MissingPolicyAction::Unlimited,
        }
    }

    /// Validation strictness for policy documents loaded under this policy
    pub fn policy_strictness(&self) -> PolicyStrictness {
        match self.environment {
            Environment::Production => PolicyStrictness::Strict,
            Environment::Development => PolicyStrictness::Permissive,
        }
    }
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self::fail_closed()
    }
}
