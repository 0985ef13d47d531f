//! Scope key model
//!
//! Pure construction of budget scope identifiers and time-window buckets.
//! A [`ScopeKey`] names exactly one countable bucket in the backing store:
//! `(scope_type, scope_id, window, window_bucket)`.
//!
//! The bucket is computed once, when the scope list is built for a
//! reservation, and travels inside the reservation token. Commit and release
//! reuse it verbatim, so a reservation opened at 23:59:59 and committed at
//! 00:00:01 still lands in the original day.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scope id used for the single global bucket.
pub const GLOBAL_SCOPE_ID: &str = "all";

/// Kind of entity a budget applies to.
///
/// Declaration order is the canonical scope order: global first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Global,
    Org,
    User,
    Provider,
    Model,
}

impl ScopeType {
    /// All scope types in canonical order.
    pub const ALL: [ScopeType; 5] = [
        ScopeType::Global,
        ScopeType::Org,
        ScopeType::User,
        ScopeType::Provider,
        ScopeType::Model,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Global => "global",
            ScopeType::Org => "org",
            ScopeType::User => "user",
            ScopeType::Provider => "provider",
            ScopeType::Model => "model",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ScopeType::Global),
            "org" => Ok(ScopeType::Org),
            "user" => Ok(ScopeType::User),
            "provider" => Ok(ScopeType::Provider),
            "model" => Ok(ScopeType::Model),
            other => Err(ScopeError::UnknownScopeType(other.to_string())),
        }
    }
}

/// Time window a limit is measured over.
///
/// Ordered from smallest to largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Window {
    #[serde(rename = "per_minute")]
    PerMinute,
    #[serde(rename = "per_hour")]
    PerHour,
    #[serde(rename = "per_day")]
    PerDay,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::PerMinute, Window::PerHour, Window::PerDay];

    /// Name used in policy documents (`per_day`).
    pub fn policy_name(&self) -> &'static str {
        match self {
            Window::PerMinute => "per_minute",
            Window::PerHour => "per_hour",
            Window::PerDay => "per_day",
        }
    }

    /// Short label used inside store keys (`day`).
    pub fn key_label(&self) -> &'static str {
        match self {
            Window::PerMinute => "minute",
            Window::PerHour => "hour",
            Window::PerDay => "day",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Window::PerMinute => Duration::minutes(1),
            Window::PerHour => Duration::hours(1),
            Window::PerDay => Duration::days(1),
        }
    }

    /// Start of the window containing `now`.
    pub fn start_of(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // Truncation to minute/hour/day cannot overflow for representable instants.
        now.duration_trunc(self.duration()).unwrap_or(now)
    }

    /// Instant at which the window containing `now` ends and a fresh bucket begins.
    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of(now) + self.duration()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy_name())
    }
}

impl FromStr for Window {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_minute" | "minute" => Ok(Window::PerMinute),
            "per_hour" | "hour" => Ok(Window::PerHour),
            "per_day" | "day" => Ok(Window::PerDay),
            other => Err(ScopeError::UnknownWindow(other.to_string())),
        }
    }
}

/// Canonical UTC bucket string for the window containing `now`.
///
/// Two instants inside the same window always produce the same string.
pub fn window_bucket(window: Window, now: DateTime<Utc>) -> String {
    match window {
        Window::PerMinute => now.format("%Y-%m-%dT%H:%M").to_string(),
        Window::PerHour => now.format("%Y-%m-%dT%H").to_string(),
        Window::PerDay => now.format("%Y-%m-%d").to_string(),
    }
}

/// Errors from scope construction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("unknown scope type '{0}'")]
    UnknownScopeType(String),

    #[error("unknown window '{0}'")]
    UnknownWindow(String),

    #[error("invalid {scope_type} id '{id}': ids must be non-empty and contain no ':' or whitespace")]
    InvalidId { scope_type: ScopeType, id: String },
}

/// One countable budget bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub window: Window,
    /// Captured at reservation time and never recomputed.
    pub window_bucket: String,
}

impl ScopeKey {
    /// Build a key for the bucket containing `now`.
    pub fn new(
        scope_type: ScopeType,
        scope_id: impl Into<String>,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<Self, ScopeError> {
        let scope_id = scope_id.into();
        validate_id(scope_type, &scope_id)?;
        Ok(Self {
            scope_type,
            scope_id,
            window,
            window_bucket: window_bucket(window, now),
        })
    }

    /// Store key for this bucket's counters.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{}counter:{}", prefix, self)
    }

    /// When this bucket's window ends, derived from the captured bucket.
    ///
    /// Returns `None` if the bucket string is not one this crate produced.
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        let start = match self.window {
            Window::PerMinute => chrono::NaiveDateTime::parse_from_str(
                &format!("{}:00", self.window_bucket),
                "%Y-%m-%dT%H:%M:%S",
            )
            .ok()?,
            Window::PerHour => chrono::NaiveDateTime::parse_from_str(
                &format!("{}:00:00", self.window_bucket),
                "%Y-%m-%dT%H:%M:%S",
            )
            .ok()?,
            Window::PerDay => chrono::NaiveDate::parse_from_str(&self.window_bucket, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?,
        };
        Some(start.and_utc() + self.window.duration())
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.scope_type,
            self.scope_id,
            self.window.key_label(),
            self.window_bucket
        )
    }
}

fn validate_id(scope_type: ScopeType, id: &str) -> Result<(), ScopeError> {
    if id.is_empty() || id.contains(':') || id.chars().any(char::is_whitespace) {
        return Err(ScopeError::InvalidId {
            scope_type,
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Build the ordered scope list a request touches, with the same windows
/// for every scope type.
///
/// Order is global, org, user, provider, model; each scope type gets one key
/// per window in `windows` (sorted, deduplicated).
pub fn build_scopes(
    org_id: &str,
    user_id: &str,
    provider: &str,
    model: &str,
    windows: &[Window],
    now: DateTime<Utc>,
) -> Result<Vec<ScopeKey>, ScopeError> {
    build_scopes_with(org_id, user_id, provider, model, |_, _| windows.to_vec(), now)
}

/// Like [`build_scopes`], but `windows_for(scope_type, scope_id)` picks the
/// windows for each scope type, so a type limited only per day gets no
/// minute or hour keys.
pub fn build_scopes_with<F>(
    org_id: &str,
    user_id: &str,
    provider: &str,
    model: &str,
    windows_for: F,
    now: DateTime<Utc>,
) -> Result<Vec<ScopeKey>, ScopeError>
where
    F: Fn(ScopeType, &str) -> Vec<Window>,
{
    let subjects = [
        (ScopeType::Global, GLOBAL_SCOPE_ID),
        (ScopeType::Org, org_id),
        (ScopeType::User, user_id),
        (ScopeType::Provider, provider),
        (ScopeType::Model, model),
    ];

    let mut scopes = Vec::with_capacity(subjects.len());
    for (scope_type, id) in subjects {
        validate_id(scope_type, id)?;
        let mut windows = windows_for(scope_type, id);
        windows.sort();
        windows.dedup();
        for window in windows {
            scopes.push(ScopeKey::new(scope_type, id, window, now)?);
        }
    }
    Ok(scopes)
}
