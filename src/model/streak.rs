use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A single resolved, scored entry reduced to what streak detection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutcome {
    pub entry_id: i64,
    pub resolved_at: DateTime<Utc>,
    pub won: bool
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub current: i32,
    pub max: i32
}

/// # Block partitioning
///
/// Outcomes are put in resolution order (`entry_id` breaks ties) and every outcome is tagged
/// with the running count of non-wins seen so far, itself included. Each non-win therefore
/// opens a new block and the wins that follow it share its key:
///
/// ```text
/// outcome:  W  W  L  W  W  W  L
/// key:      0  0  1  1  1  1  2
/// ```
///
/// - `max` is the largest number of wins inside any block.
/// - `current` is the win count of the latest block, but only when the latest outcome is a
///   win; otherwise the run was just broken and it is 0.
pub fn compute_streak(outcomes: &[ResolvedOutcome]) -> Streak {
    let ordered = outcomes
        .iter()
        .sorted_by(|a, b| a.resolved_at.cmp(&b.resolved_at).then(a.entry_id.cmp(&b.entry_id)))
        .collect_vec();

    let mut non_wins = 0;
    let keyed = ordered.iter().map(|outcome| {
        if !outcome.won {
            non_wins += 1;
        }
        (non_wins, outcome.won)
    });

    let block_wins = keyed
        .chunk_by(|(key, _)| *key)
        .into_iter()
        .map(|(_, block)| block.filter(|(_, won)| *won).count() as i32)
        .collect_vec();

    let max = block_wins.iter().copied().max().unwrap_or(0);
    let latest_is_win = ordered.last().map(|o| o.won).unwrap_or(false);
    let current = if latest_is_win {
        block_wins.last().copied().unwrap_or(0)
    } else {
        0
    };

    Streak { current, max }
}

/// Computes streaks for many users at once. Users are independent so the scan runs in
/// parallel.
pub fn compute_streaks(outcomes_by_user: &HashMap<i32, Vec<ResolvedOutcome>>) -> HashMap<i32, Streak> {
    outcomes_by_user
        .par_iter()
        .map(|(user_id, outcomes)| (*user_id, compute_streak(outcomes)))
        .collect()
}
