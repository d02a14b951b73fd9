use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;

use crate::{
    database::db_structs::{LeaderboardSnapshot, StreakState, UserRatingSummary},
    model::{
        merge::MergedEntry,
        structures::{rating_level::RatingLevel, scope::Scope}
    }
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub entry: MergedEntry,
    pub level: RatingLevel,
    pub mythic_rank: Option<i32>,
    /// 1-based position in the global order
    pub position: i32
}

impl RankedEntry {
    pub fn to_summary(&self, recalculated_at: DateTime<Utc>) -> UserRatingSummary {
        UserRatingSummary {
            user_id: self.entry.user_id(),
            total_points: self.entry.total_points,
            seasonal_points: self.entry.seasonal_points,
            yearly_points: self.entry.yearly_points,
            level: self.level,
            mythic_rank: self.mythic_rank,
            prediction_count: self.entry.stats.prediction_count,
            prediction_wins: self.entry.stats.prediction_wins,
            last_recalculated_at: recalculated_at
        }
    }

    pub fn to_streak_state(&self) -> StreakState {
        let streak = self.entry.streak();

        StreakState {
            user_id: self.entry.user_id(),
            current_streak: streak.current,
            max_streak: streak.max,
            last_prediction_at: self.entry.stats.last_prediction_at,
            last_resolved_at: self.entry.stats.last_resolved_at
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPayload {
    level: RatingLevel,
    mythic_rank: Option<i32>,
    total_points: i64,
    seasonal_points: i64,
    yearly_points: i64,
    prediction_count: i64,
    prediction_wins: i64,
    current_streak: i32,
    max_streak: i32
}

/// Global order: total desc, seasonal desc, yearly desc, user id asc.
pub fn global_order(a: &MergedEntry, b: &MergedEntry) -> Ordering {
    b.total_points
        .cmp(&a.total_points)
        .then(b.seasonal_points.cmp(&a.seasonal_points))
        .then(b.yearly_points.cmp(&a.yearly_points))
        .then(a.user_id().cmp(&b.user_id()))
}

/// Order for a scope's leaderboard, matching [`Scope::order_by_clause`].
pub fn scope_order(scope: Scope, a: &MergedEntry, b: &MergedEntry) -> Ordering {
    match scope {
        Scope::Global => global_order(a, b),
        _ => b
            .points(scope)
            .cmp(&a.points(scope))
            .then(b.total_points.cmp(&a.total_points))
            .then(a.user_id().cmp(&b.user_id()))
    }
}

/// The ranked population of one recalculation, kept in global order.
pub struct Leaderboard {
    entries: IndexMap<i32, RankedEntry>
}

impl Leaderboard {
    /// Sorts merged entries into global order, derives each level from all-time points and
    /// hands out mythic ranks 1..k to the top-tier entries in that order.
    pub fn assign(merged: Vec<MergedEntry>) -> Leaderboard {
        let sorted = merged.into_iter().sorted_by(global_order);

        let mut entries = IndexMap::with_capacity(sorted.len());
        let mut mythic_counter = 0;

        for (i, entry) in sorted.enumerate() {
            let level = RatingLevel::from_points(entry.total_points);
            let mythic_rank = if level.is_top() {
                mythic_counter += 1;
                Some(mythic_counter)
            } else {
                None
            };

            entries.insert(
                entry.user_id(),
                RankedEntry {
                    entry,
                    level,
                    mythic_rank,
                    position: i as i32 + 1
                }
            );
        }

        Leaderboard { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, user_id: i32) -> Option<&RankedEntry> {
        self.entries.get(&user_id)
    }

    /// Entries in global order.
    pub fn iter(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.values()
    }

    pub fn summaries(&self, recalculated_at: DateTime<Utc>) -> Vec<UserRatingSummary> {
        self.iter().map(|e| e.to_summary(recalculated_at)).collect()
    }

    pub fn streak_states(&self) -> Vec<StreakState> {
        self.iter().map(|e| e.to_streak_state()).collect()
    }

    /// The first `cap` entries of a scope's order, as snapshot rows sharing `captured_at`.
    pub fn snapshot(&self, scope: Scope, cap: usize, captured_at: DateTime<Utc>) -> Vec<LeaderboardSnapshot> {
        self.iter()
            .sorted_by(|a, b| scope_order(scope, &a.entry, &b.entry))
            .take(cap)
            .enumerate()
            .map(|(i, ranked)| LeaderboardSnapshot {
                user_id: ranked.entry.user_id(),
                scope,
                rank: i as i32 + 1,
                points: ranked.entry.points(scope),
                captured_at,
                payload: snapshot_payload(ranked)
            })
            .collect()
    }
}

fn snapshot_payload(ranked: &RankedEntry) -> serde_json::Value {
    let streak = ranked.entry.streak();
    let payload = SnapshotPayload {
        level: ranked.level,
        mythic_rank: ranked.mythic_rank,
        total_points: ranked.entry.total_points,
        seasonal_points: ranked.entry.seasonal_points,
        yearly_points: ranked.entry.yearly_points,
        prediction_count: ranked.entry.stats.prediction_count,
        prediction_wins: ranked.entry.stats.prediction_wins,
        current_streak: streak.current,
        max_streak: streak.max
    };

    serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
}
