//! Raw policy document as written by operators
//!
//! Deserialized as-is and then checked by [`super::validate_policy`]. Unknown
//! scope types and unknown window names fail at parse time.

use crate::scope::{ScopeType, Window};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Limits keyed by window name. Signed so negative values can be reported
/// as validation errors rather than opaque parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day: Option<i64>,
}

impl WindowLimits {
    pub fn entries(&self) -> impl Iterator<Item = (Window, i64)> + '_ {
        [
            (Window::PerMinute, self.per_minute),
            (Window::PerHour, self.per_hour),
            (Window::PerDay, self.per_day),
        ]
        .into_iter()
        .filter_map(|(window, limit)| limit.map(|l| (window, l)))
    }
}

/// Section for one scope type: default limits plus per-entity overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_minute: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_hour: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_day: Option<i64>,
    /// Entity id (org id, user id, provider or model name) → limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, WindowLimits>,
}

impl ScopeSection {
    pub fn defaults(&self) -> WindowLimits {
        WindowLimits {
            per_minute: self.per_minute,
            per_hour: self.per_hour,
            per_day: self.per_day,
        }
    }
}

/// Top-level policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<ScopeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<ScopeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ScopeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ScopeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ScopeSection>,
    /// Fallback for any scope type without its own entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<WindowLimits>,
}

impl PolicyDocument {
    pub fn section(&self, scope_type: ScopeType) -> Option<&ScopeSection> {
        match scope_type {
            ScopeType::Global => self.global.as_ref(),
            ScopeType::Org => self.org.as_ref(),
            ScopeType::User => self.user.as_ref(),
            ScopeType::Provider => self.provider.as_ref(),
            ScopeType::Model => self.model.as_ref(),
        }
    }

    /// Parse JSON.
    pub fn from_json(content: &str) -> Result<Self, super::PolicyError> {
        serde_json::from_str(content).map_err(|e| super::PolicyError::Parse(e.to_string()))
    }

    /// Parse TOML.
    pub fn from_toml(content: &str) -> Result<Self, super::PolicyError> {
        toml::from_str(content).map_err(|e| super::PolicyError::Parse(e.to_string()))
    }
}
