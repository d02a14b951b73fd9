use crate::model::structures::rating_level::RatingLevel;

// Tier thresholds on all-time points, ascending
pub const LEVEL_THRESHOLDS: [(RatingLevel, i64); 6] = [
    (RatingLevel::Rookie, 0),
    (RatingLevel::Contender, 100),
    (RatingLevel::Analyst, 500),
    (RatingLevel::Expert, 1_500),
    (RatingLevel::Oracle, 4_000),
    (RatingLevel::Mythic, 10_000)
];

// Scope length defaults, used when ranking_settings is missing or incomplete
pub const DEFAULT_CURRENT_SCOPE_DAYS: i64 = 30;
pub const DEFAULT_YEARLY_SCOPE_DAYS: i64 = 365;
pub const DEFAULT_MIN_SCOPE_DAYS: i64 = 1;
pub const DEFAULT_MAX_SCOPE_DAYS: i64 = 366;
// Hard ceiling for any configured scope length (about a century)
pub const SCOPE_DAYS_CEILING: i64 = 36_525;
