//! Budget policy evaluation
//!
//! A [`BudgetPolicy`] is the validated, immutable form of a
//! [`PolicyDocument`]. Limits resolve most-specific first:
//!
//! 1. per-entity override for the scope id
//! 2. the scope type's own default
//! 3. the document-wide `default` section
//!
//! Anything else is [`PolicyError::NotFound`]. How that is treated (reject or
//! unlimited) is decided by the degradation policy, not here.

pub mod document;
pub mod error;

pub use document::{PolicyDocument, ScopeSection, WindowLimits};
pub use error::PolicyError;

use crate::scope::{ScopeKey, ScopeType, Window};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// How strictly a policy document is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStrictness {
    /// Every scope type must resolve to a limit
    Strict,
    /// Missing scope types are logged and left unresolved
    Permissive,
}

/// Validated limits for one window set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitSet(BTreeMap<Window, u64>);

impl LimitSet {
    pub fn get(&self, window: Window) -> Option<u64> {
        self.0.get(&window).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Window, u64)> + '_ {
        self.0.iter().map(|(w, l)| (*w, *l))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ScopeLimits {
    defaults: LimitSet,
    overrides: HashMap<String, LimitSet>,
}

/// Immutable, validated budget policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BudgetPolicy {
    scopes: BTreeMap<ScopeType, ScopeLimits>,
    default: LimitSet,
}

impl BudgetPolicy {
    /// Resolve the limit for one bucket.
    pub fn limit_for(&self, scope: &ScopeKey) -> Result<u64, PolicyError> {
        if let Some(limits) = self.scopes.get(&scope.scope_type) {
            if let Some(limit) = limits
                .overrides
                .get(&scope.scope_id)
                .and_then(|o| o.get(scope.window))
            {
                return Ok(limit);
            }
            if let Some(limit) = limits.defaults.get(scope.window) {
                return Ok(limit);
            }
        }

        self.default
            .get(scope.window)
            .ok_or_else(|| PolicyError::NotFound {
                scope: scope.to_string(),
            })
    }

    /// Every window any limit in the policy is measured over.
    ///
    /// Falls back to `per_day` for an empty policy so requests still get
    /// counted somewhere.
    pub fn windows(&self) -> Vec<Window> {
        let mut windows: BTreeSet<Window> = self.default.iter().map(|(w, _)| w).collect();
        for limits in self.scopes.values() {
            windows.extend(limits.defaults.iter().map(|(w, _)| w));
            for set in limits.overrides.values() {
                windows.extend(set.iter().map(|(w, _)| w));
            }
        }
        if windows.is_empty() {
            return vec![Window::PerDay];
        }
        windows.into_iter().collect()
    }

    /// Windows that resolve to a limit for one scope id.
    ///
    /// This is the union of the entity override, the scope type's own
    /// defaults and the `default` section, which are exactly the windows
    /// [`BudgetPolicy::limit_for`] answers for. A scope type nothing covers
    /// falls back to [`BudgetPolicy::windows`] so the gap still surfaces
    /// when limits are resolved.
    pub fn windows_for(&self, scope_type: ScopeType, scope_id: &str) -> Vec<Window> {
        let mut windows: BTreeSet<Window> = self.default.iter().map(|(w, _)| w).collect();
        if let Some(limits) = self.scopes.get(&scope_type) {
            windows.extend(limits.defaults.iter().map(|(w, _)| w));
            if let Some(set) = limits.overrides.get(scope_id) {
                windows.extend(set.iter().map(|(w, _)| w));
            }
        }
        if windows.is_empty() {
            return self.windows();
        }
        windows.into_iter().collect()
    }

    /// Scope types with an explicit section.
    pub fn configured_scope_types(&self) -> Vec<ScopeType> {
        self.scopes.keys().copied().collect()
    }

    /// Rows of `(scope_type, entity, window, limit)` for display.
    /// `entity` is `None` for scope-type defaults; the document-wide default
    /// is reported with `scope_type = None`.
    pub fn rows(&self) -> Vec<PolicyRow> {
        let mut rows = Vec::new();
        for (scope_type, limits) in &self.scopes {
            for (window, limit) in limits.defaults.iter() {
                rows.push(PolicyRow {
                    scope_type: Some(*scope_type),
                    entity: None,
                    window,
                    limit,
                });
            }
            let mut overrides: Vec<_> = limits.overrides.iter().collect();
            overrides.sort_by(|a, b| a.0.cmp(b.0));
            for (entity, set) in overrides {
                for (window, limit) in set.iter() {
                    rows.push(PolicyRow {
                        scope_type: Some(*scope_type),
                        entity: Some(entity.clone()),
                        window,
                        limit,
                    });
                }
            }
        }
        for (window, limit) in self.default.iter() {
            rows.push(PolicyRow {
                scope_type: None,
                entity: None,
                window,
                limit,
            });
        }
        rows
    }

    /// Read, parse and validate a policy file. `.toml` files are parsed as
    /// TOML, everything else as JSON.
    pub fn load(path: &Path, strictness: PolicyStrictness) -> Result<Self, PolicyError> {
        if !path.exists() {
            return Err(PolicyError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let document = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => PolicyDocument::from_toml(&content)?,
            _ => PolicyDocument::from_json(&content)?,
        };
        validate_policy(document, strictness)
    }
}

/// One displayable policy entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyRow {
    pub scope_type: Option<ScopeType>,
    pub entity: Option<String>,
    pub window: Window,
    pub limit: u64,
}

fn limit_set(field: &str, limits: &WindowLimits) -> Result<LimitSet, PolicyError> {
    let mut set = BTreeMap::new();
    for (window, limit) in limits.entries() {
        let limit = u64::try_from(limit).map_err(|_| PolicyError::Validation {
            field: format!("{}.{}", field, window.policy_name()),
            message: format!("limit must be >= 0, got {}", limit),
        })?;
        set.insert(window, limit);
    }
    Ok(LimitSet(set))
}

/// Validate a raw document into an immutable [`BudgetPolicy`].
pub fn validate_policy(
    raw: PolicyDocument,
    strictness: PolicyStrictness,
) -> Result<BudgetPolicy, PolicyError> {
    let default = match &raw.default {
        Some(limits) => limit_set("default", limits)?,
        None => LimitSet::default(),
    };

    let mut scopes = BTreeMap::new();
    for scope_type in ScopeType::ALL {
        let Some(section) = raw.section(scope_type) else {
            continue;
        };
        let field = scope_type.as_str();
        let defaults = limit_set(field, &section.defaults())?;

        let mut overrides = HashMap::new();
        for (entity, limits) in &section.overrides {
            if entity.is_empty() || entity.contains(':') {
                return Err(PolicyError::Validation {
                    field: format!("{}.overrides", field),
                    message: format!("invalid entity id '{}'", entity),
                });
            }
            let set = limit_set(&format!("{}.overrides.{}", field, entity), limits)?;
            overrides.insert(entity.clone(), set);
        }

        scopes.insert(scope_type, ScopeLimits { defaults, overrides });
    }

    for scope_type in ScopeType::ALL {
        let covered = scopes
            .get(&scope_type)
            .is_some_and(|l| !l.defaults.is_empty())
            || !default.is_empty();
        if covered {
            continue;
        }
        match strictness {
            PolicyStrictness::Strict => return Err(PolicyError::MissingScopeType(scope_type)),
            PolicyStrictness::Permissive => {
                tracing::warn!(
                    scope_type = %scope_type,
                    "Policy has no default limit for scope type; requests will not be limited on it"
                );
            }
        }
    }

    Ok(BudgetPolicy { scopes, default })
}
