//! Wave-chunked writes of a recalculation's results.
//!
//! Statements inside a wave are pipelined over the transaction's connection; waves run one
//! after another so at most `wave_size` statements are in flight.

use futures::future::try_join_all;
use indicatif::ProgressBar;
use postgres_types::ToSql;
use tokio_postgres::Transaction;
use tracing::{debug, info};

use super::{
    db_structs::{LeaderboardSnapshot, StreakState, UserRatingSummary},
    error::Result
};
use crate::model::{structures::rating_level::RatingLevel, window::ResolvedWindows};

const UPSERT_SUMMARY: &str = "INSERT INTO user_rating_summaries \
     (user_id, total_points, seasonal_points, yearly_points, level, mythic_rank, \
      prediction_count, prediction_wins, last_recalculated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
     ON CONFLICT (user_id) DO UPDATE SET \
      total_points = EXCLUDED.total_points, \
      seasonal_points = EXCLUDED.seasonal_points, \
      yearly_points = EXCLUDED.yearly_points, \
      level = EXCLUDED.level, \
      mythic_rank = EXCLUDED.mythic_rank, \
      prediction_count = EXCLUDED.prediction_count, \
      prediction_wins = EXCLUDED.prediction_wins, \
      last_recalculated_at = EXCLUDED.last_recalculated_at";

const UPSERT_STREAK: &str = "INSERT INTO user_streaks \
     (user_id, current_streak, max_streak, last_prediction_at, last_resolved_at) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (user_id) DO UPDATE SET \
      current_streak = EXCLUDED.current_streak, \
      max_streak = EXCLUDED.max_streak, \
      last_prediction_at = EXCLUDED.last_prediction_at, \
      last_resolved_at = EXCLUDED.last_resolved_at";

const INSERT_SNAPSHOT: &str = "INSERT INTO leaderboard_snapshots \
     (user_id, scope, rank, points, captured_at, payload) VALUES ($1, $2, $3, $4, $5, $6)";

fn summary_params<'a>(s: &'a UserRatingSummary, level: &'a i32) -> [&'a (dyn ToSql + Sync); 9] {
    [
        &s.user_id,
        &s.total_points,
        &s.seasonal_points,
        &s.yearly_points,
        level,
        &s.mythic_rank,
        &s.prediction_count,
        &s.prediction_wins,
        &s.last_recalculated_at
    ]
}

fn streak_params(s: &StreakState) -> [&(dyn ToSql + Sync); 5] {
    [
        &s.user_id,
        &s.current_streak,
        &s.max_streak,
        &s.last_prediction_at,
        &s.last_resolved_at
    ]
}

fn snapshot_params<'a>(s: &'a LeaderboardSnapshot, scope: &'a i32) -> [&'a (dyn ToSql + Sync); 6] {
    [&s.user_id, scope, &s.rank, &s.points, &s.captured_at, &s.payload]
}

/// Upserts one summary row per user. Returns the number of rows written.
pub async fn save_summaries(
    tx: &Transaction<'_>,
    summaries: &[UserRatingSummary],
    wave_size: usize,
    progress: Option<&ProgressBar>
) -> Result<u64> {
    let statement = tx.prepare(UPSERT_SUMMARY).await?;
    let mut written = 0;

    for wave in summaries.chunks(wave_size.max(1)) {
        let levels: Vec<i32> = wave.iter().map(|s| s.level as i32).collect();
        let futures = wave
            .iter()
            .zip(levels.iter())
            .map(|(s, level)| tx.execute_raw(&statement, summary_params(s, level)));

        written += try_join_all(futures).await?.iter().sum::<u64>();

        if let Some(bar) = progress {
            bar.inc(wave.len() as u64);
        }
    }

    debug!("Upserted {} rating summaries", written);
    Ok(written)
}

/// Upserts one streak row per user. Returns the number of rows written.
pub async fn save_streaks(
    tx: &Transaction<'_>,
    streaks: &[StreakState],
    wave_size: usize,
    progress: Option<&ProgressBar>
) -> Result<u64> {
    let statement = tx.prepare(UPSERT_STREAK).await?;
    let mut written = 0;

    for wave in streaks.chunks(wave_size.max(1)) {
        let futures = wave
            .iter()
            .map(|s| tx.execute_raw(&statement, streak_params(s)));

        written += try_join_all(futures).await?.iter().sum::<u64>();

        if let Some(bar) = progress {
            bar.inc(wave.len() as u64);
        }
    }

    debug!("Upserted {} streak rows", written);
    Ok(written)
}

/// Appends a snapshot batch. Existing batches are never touched.
pub async fn save_snapshots(tx: &Transaction<'_>, snapshots: &[LeaderboardSnapshot], wave_size: usize) -> Result<u64> {
    let statement = tx.prepare(INSERT_SNAPSHOT).await?;
    let mut written = 0;

    for wave in snapshots.chunks(wave_size.max(1)) {
        let scopes: Vec<i32> = wave.iter().map(|s| s.scope as i32).collect();
        let futures = wave
            .iter()
            .zip(scopes.iter())
            .map(|(s, scope)| tx.execute_raw(&statement, snapshot_params(s, scope)));

        written += try_join_all(futures).await?.iter().sum::<u64>();
    }

    info!("Appended {} leaderboard snapshot rows", written);
    Ok(written)
}

/// Records a finished full run together with the windows it scored with.
pub async fn save_run(
    tx: &Transaction<'_>,
    windows: &ResolvedWindows,
    users_written: usize,
    snapshot_rows: u64
) -> Result<()> {
    let windows_json = serde_json::to_value(windows)?;
    let users_written = users_written as i32;
    let snapshot_rows = snapshot_rows as i64;
    let params: [&(dyn ToSql + Sync); 4] = [&windows.anchor, &users_written, &snapshot_rows, &windows_json];

    tx.execute(
        "INSERT INTO ranking_runs (recalculated_at, users_written, snapshot_rows, windows) VALUES ($1, $2, $3, $4)",
        &params
    )
    .await?;

    Ok(())
}

/// Re-densifies mythic ranks over every persisted summary, in global order. Needed after a
/// targeted recalculation, which only sees part of the population.
pub async fn rerank_mythic(tx: &Transaction<'_>) -> Result<u64> {
    let top_level = RatingLevel::Mythic as i32;
    let cleared = tx
        .execute(
            "UPDATE user_rating_summaries SET mythic_rank = NULL WHERE level <> $1 AND mythic_rank IS NOT NULL",
            &[&top_level]
        )
        .await?;
    let ranked = tx
        .execute(
            "UPDATE user_rating_summaries s SET mythic_rank = r.position \
             FROM (SELECT user_id, ROW_NUMBER() OVER \
                     (ORDER BY total_points DESC, seasonal_points DESC, yearly_points DESC, user_id ASC)::int4 \
                     AS position \
                   FROM user_rating_summaries WHERE level = $1) r \
             WHERE s.user_id = r.user_id AND s.mythic_rank IS DISTINCT FROM r.position",
            &[&top_level]
        )
        .await?;

    debug!("Re-ranked mythic tier ({} cleared, {} moved)", cleared, ranked);
    Ok(cleared + ranked)
}
