use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    constants::{
        DEFAULT_CURRENT_SCOPE_DAYS, DEFAULT_MAX_SCOPE_DAYS, DEFAULT_MIN_SCOPE_DAYS, DEFAULT_YEARLY_SCOPE_DAYS,
        SCOPE_DAYS_CEILING
    },
    structures::scope::Scope
};

/// Scope lengths as configured by admins. Every field is optional on disk; missing
/// values fall back to the defaults in [`ScopeSettings::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSettings {
    pub current_scope_days: i64,
    pub yearly_scope_days: i64,
    pub min_scope_days: i64,
    pub max_scope_days: i64
}

impl Default for ScopeSettings {
    fn default() -> Self {
        ScopeSettings {
            current_scope_days: DEFAULT_CURRENT_SCOPE_DAYS,
            yearly_scope_days: DEFAULT_YEARLY_SCOPE_DAYS,
            min_scope_days: DEFAULT_MIN_SCOPE_DAYS,
            max_scope_days: DEFAULT_MAX_SCOPE_DAYS
        }
    }
}

impl ScopeSettings {
    /// Builds settings from nullable columns, substituting defaults field by field.
    pub fn from_partial(
        current_scope_days: Option<i64>,
        yearly_scope_days: Option<i64>,
        min_scope_days: Option<i64>,
        max_scope_days: Option<i64>
    ) -> ScopeSettings {
        let defaults = ScopeSettings::default();

        ScopeSettings {
            current_scope_days: current_scope_days.unwrap_or(defaults.current_scope_days),
            yearly_scope_days: yearly_scope_days.unwrap_or(defaults.yearly_scope_days),
            min_scope_days: min_scope_days.unwrap_or(defaults.min_scope_days),
            max_scope_days: max_scope_days.unwrap_or(defaults.max_scope_days)
        }
    }

    /// Clamps both lengths into `[min, max]` and coerces the yearly length to be at least
    /// the current length, so the yearly window always contains the current window.
    ///
    /// A misconfigured range (min above max, non-positive bounds, lengths beyond
    /// [`SCOPE_DAYS_CEILING`]) is repaired rather than rejected.
    pub fn normalized(&self) -> ScopeSettings {
        let min = self.min_scope_days.clamp(1, SCOPE_DAYS_CEILING);
        let max = self.max_scope_days.clamp(min, SCOPE_DAYS_CEILING);

        let current = self.current_scope_days.clamp(min, max);
        let yearly = self.yearly_scope_days.clamp(min, max).max(current);

        ScopeSettings {
            current_scope_days: current,
            yearly_scope_days: yearly,
            min_scope_days: min,
            max_scope_days: max
        }
    }

    pub fn length_days(&self, scope: Scope) -> Option<i64> {
        match scope {
            Scope::Global => None,
            Scope::Current => Some(self.current_scope_days),
            Scope::Yearly => Some(self.yearly_scope_days)
        }
    }
}

/// An admin-defined season. When active and already started it replaces the rolling window
/// for its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonOverride {
    pub id: i32,
    pub scope: Scope,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool
}

impl SeasonOverride {
    fn applies_at(&self, scope: Scope, anchor: DateTime<Utc>) -> bool {
        self.is_active && self.scope == scope && self.starts_at <= anchor
    }
}

/// Where a window's boundaries came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum WindowSource {
    Rolling { days: i64 },
    Season { override_id: i32, name: String }
}

/// Inclusive `[start, end]` time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: WindowSource
}

impl Window {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWindows {
    pub anchor: DateTime<Utc>,
    pub current: Window,
    pub yearly: Window
}

impl ResolvedWindows {
    pub fn for_scope(&self, scope: Scope) -> Option<&Window> {
        match scope {
            Scope::Global => None,
            Scope::Current => Some(&self.current),
            Scope::Yearly => Some(&self.yearly)
        }
    }
}

/// Resolves the current and yearly windows for `anchor`.
pub fn resolve_windows(
    anchor: DateTime<Utc>,
    settings: &ScopeSettings,
    overrides: &[SeasonOverride]
) -> ResolvedWindows {
    let settings = settings.normalized();

    ResolvedWindows {
        anchor,
        current: resolve_window(Scope::Current, anchor, settings.current_scope_days, overrides),
        yearly: resolve_window(Scope::Yearly, anchor, settings.yearly_scope_days, overrides)
    }
}

/// The latest-starting applicable season wins when several overlap.
fn resolve_window(scope: Scope, anchor: DateTime<Utc>, days: i64, overrides: &[SeasonOverride]) -> Window {
    let season = overrides
        .iter()
        .filter(|o| o.applies_at(scope, anchor))
        .max_by_key(|o| (o.starts_at, o.id));

    match season {
        Some(season) => Window {
            start: season.starts_at,
            end: season.ends_at.unwrap_or(anchor),
            source: WindowSource::Season {
                override_id: season.id,
                name: season.name.clone()
            }
        },
        None => Window {
            start: anchor - Duration::days(days),
            end: anchor,
            source: WindowSource::Rolling { days }
        }
    }
}
