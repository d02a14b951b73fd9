use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::{Display, EnumIter, EnumString};

/// The ranking windows a leaderboard can be read for.
///
/// `Global` ranks by all-time points, `Current` by the short (possibly season-bound)
/// window and `Yearly` by the long window that always contains the current one.
#[derive(
    Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(u8)]
pub enum Scope {
    #[default]
    Global = 0,
    Current = 1,
    Yearly = 2
}

impl Scope {
    /// Summary column ordered on when reading a leaderboard for this scope.
    pub fn points_column(&self) -> &'static str {
        match self {
            Scope::Global => "total_points",
            Scope::Current => "seasonal_points",
            Scope::Yearly => "yearly_points"
        }
    }

    /// Ordering used for this scope's leaderboard. The scope's own column leads, all-time
    /// points break ties and the user id makes the order total.
    pub fn order_by_clause(&self) -> &'static str {
        match self {
            Scope::Global => "s.total_points DESC, s.seasonal_points DESC, s.yearly_points DESC, s.user_id ASC",
            Scope::Current => "s.seasonal_points DESC, s.total_points DESC, s.user_id ASC",
            Scope::Yearly => "s.yearly_points DESC, s.total_points DESC, s.user_id ASC"
        }
    }

    /// Windowed scopes are the ones a point adjustment or a season override can target.
    pub fn is_windowed(&self) -> bool {
        !matches!(self, Scope::Global)
    }
}

impl TryFrom<i32> for Scope {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Scope::Global),
            1 => Ok(Scope::Current),
            2 => Ok(Scope::Yearly),
            _ => Err(())
        }
    }
}

/// Adjustment rows store `NULL` for global deltas.
pub fn scope_from_nullable(v: Option<i32>) -> Result<Scope, ()> {
    match v {
        None => Ok(Scope::Global),
        Some(code) => Scope::try_from(code)
    }
}

/// Inverse of [`scope_from_nullable`].
pub fn scope_to_nullable(scope: Scope) -> Option<i32> {
    match scope {
        Scope::Global => None,
        other => Some(other as i32)
    }
}
