use crate::model::{
    streak::Streak,
    structures::{job_status::JobStatus, rating_level::RatingLevel, scope::Scope},
    window::ResolvedWindows
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user output of the score extractor, before adjustments are folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedStats {
    pub user_id: i32,
    pub all_time_points: i64,
    pub current_window_points: i64,
    pub yearly_window_points: i64,
    /// Number of resolved, scored entries
    pub prediction_count: i64,
    pub prediction_wins: i64,
    /// Most recent submission, resolved or not
    pub last_prediction_at: Option<DateTime<Utc>>,
    pub last_resolved_at: Option<DateTime<Utc>>,
    pub streak: Streak
}

/// Sum of a user's adjustments for one scope, as returned by the grouped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentSum {
    pub user_id: i32,
    pub scope: Scope,
    pub delta: i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointAdjustment {
    pub user_id: i32,
    pub delta: i64,
    /// `Global` is persisted as NULL
    pub scope: Scope,
    pub reason: String
}

/// The live, overwritten-in-place rating row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRatingSummary {
    pub user_id: i32,
    pub total_points: i64,
    pub seasonal_points: i64,
    pub yearly_points: i64,
    pub level: RatingLevel,
    pub mythic_rank: Option<i32>,
    pub prediction_count: i64,
    pub prediction_wins: i64,
    pub last_recalculated_at: DateTime<Utc>
}

impl UserRatingSummary {
    pub fn points(&self, scope: Scope) -> i64 {
        match scope {
            Scope::Global => self.total_points,
            Scope::Current => self.seasonal_points,
            Scope::Yearly => self.yearly_points
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub user_id: i32,
    pub current_streak: i32,
    pub max_streak: i32,
    pub last_prediction_at: Option<DateTime<Utc>>,
    pub last_resolved_at: Option<DateTime<Utc>>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    pub user_id: i32,
    pub scope: Scope,
    pub rank: i32,
    pub points: i64,
    pub captured_at: DateTime<Utc>,
    pub payload: serde_json::Value
}

/// Summary joined with streak state, as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub summary: UserRatingSummary,
    pub streak: StreakState,
    /// `prediction_wins / prediction_count`, 0 when nothing has resolved yet
    pub accuracy: f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub points: i64,
    #[serde(flatten)]
    pub rating: RatingView
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub scope: Scope,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub entries: Vec<LeaderboardEntry>,
    pub windows: ResolvedWindows,
    pub captured_at: DateTime<Utc>
}

impl LeaderboardPage {
    /// Weak validator for conditional requests; changes whenever the page could have changed.
    pub fn etag(&self) -> String {
        format!(
            "W/\"{}-{}-{}-{}-{}\"",
            self.scope,
            self.page,
            self.page_size,
            self.total,
            self.captured_at.timestamp_millis()
        )
    }
}

/// What the achievement subsystem asks to be paid out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPayload {
    pub user_id: i32,
    pub group: String,
    pub tier: i32,
    pub points: i64,
    pub scope_year: i32
}

impl RewardPayload {
    /// Identity of a reward; at most one reward row may exist per key.
    pub fn idempotency_key(&self) -> (i32, &str, i32, i32) {
        (self.user_id, self.group.as_str(), self.tier, self.scope_year)
    }

    pub fn adjustment_reason(&self) -> String {
        format!("achievement:{}:{}:{}", self.group, self.tier, self.scope_year)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardJob {
    pub id: i64,
    pub payload: RewardPayload,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>
}

/// Result of applying one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardOutcome {
    /// Reward and adjustment rows were written by this call
    Applied,
    /// The idempotency record already existed; nothing was written
    AlreadyApplied
}
