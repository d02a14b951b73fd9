use std::collections::HashMap;

use serde::Serialize;

use crate::{
    database::db_structs::{AdjustmentSum, ExtractedStats},
    model::{streak::Streak, structures::scope::Scope}
};

/// A user's adjustments split into the three buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentTotals {
    pub global: i64,
    pub current: i64,
    pub yearly: i64
}

/// Extracted stats with adjustments applied; input to rank assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedEntry {
    pub stats: ExtractedStats,
    pub adjustments: AdjustmentTotals,
    pub total_points: i64,
    pub seasonal_points: i64,
    pub yearly_points: i64
}

impl MergedEntry {
    pub fn user_id(&self) -> i32 {
        self.stats.user_id
    }

    pub fn streak(&self) -> Streak {
        self.stats.streak
    }

    pub fn points(&self, scope: Scope) -> i64 {
        match scope {
            Scope::Global => self.total_points,
            Scope::Current => self.seasonal_points,
            Scope::Yearly => self.yearly_points
        }
    }
}

/// Folds grouped adjustment sums into per-user buckets.
pub fn bucket_adjustments(sums: &[AdjustmentSum]) -> HashMap<i32, AdjustmentTotals> {
    let mut buckets: HashMap<i32, AdjustmentTotals> = HashMap::new();

    for sum in sums {
        let totals = buckets.entry(sum.user_id).or_default();
        match sum.scope {
            Scope::Global => totals.global += sum.delta,
            Scope::Current => totals.current += sum.delta,
            Scope::Yearly => totals.yearly += sum.delta
        }
    }

    buckets
}

/// - seasonal = current window sum + global + current adjustments
/// - yearly = yearly window sum + global + yearly adjustments
/// - total = all-time sum + global adjustments
pub fn merge(stats: ExtractedStats, adjustments: AdjustmentTotals) -> MergedEntry {
    let total_points = stats.all_time_points + adjustments.global;
    let seasonal_points = stats.current_window_points + adjustments.global + adjustments.current;
    let yearly_points = stats.yearly_window_points + adjustments.global + adjustments.yearly;

    MergedEntry {
        stats,
        adjustments,
        total_points,
        seasonal_points,
        yearly_points
    }
}

/// Merges every user present in either input. Users with adjustments but no scored entries
/// get zeroed stats.
pub fn merge_all(stats: Vec<ExtractedStats>, sums: &[AdjustmentSum]) -> Vec<MergedEntry> {
    let mut buckets = bucket_adjustments(sums);
    let mut merged = Vec::with_capacity(stats.len());

    for s in stats {
        let adjustments = buckets.remove(&s.user_id).unwrap_or_default();
        merged.push(merge(s, adjustments));
    }

    for (user_id, adjustments) in buckets {
        let stats = ExtractedStats {
            user_id,
            ..Default::default()
        };
        merged.push(merge(stats, adjustments));
    }

    merged
}
