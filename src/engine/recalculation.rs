use std::{future::Future, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info};

use super::config::EngineConfig;
use crate::{
    database::{
        db::DbClient,
        db_structs::RatingView,
        error::{DbError, Result},
        extract::{adjustment_sums, extract_stats},
        persist::{rerank_mythic, save_run, save_snapshots, save_streaks, save_summaries}
    },
    messaging::{
        invalidation::{invalidate_everything, invalidate_users},
        CacheInvalidator
    },
    model::{
        merge::merge_all,
        ranking::Leaderboard,
        structures::scope::Scope,
        window::{resolve_windows, ResolvedWindows}
    },
    utils::progress_utils::progress_bar
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculationReport {
    /// Whole population (true) or an explicit user set
    pub full: bool,
    pub users_written: usize,
    pub snapshot_rows: u64,
    pub windows: ResolvedWindows,
    pub recalculated_at: DateTime<Utc>,
    pub elapsed_ms: u64
}

/// Anything that can recompute ratings for an explicit user set.
#[async_trait]
pub trait Recalculator: Send + Sync {
    async fn recalculate_users(&self, users: &[i32]) -> Result<RecalculationReport>;
}

/// Recomputes and serves ratings.
///
/// Every recalculation runs as one REPEATABLE READ transaction bounded by
/// [`EngineConfig::transaction_timeout`]: either all summary, streak and snapshot rows of a
/// run become visible or none do.
#[derive(Clone)]
pub struct RatingEngine {
    pub(crate) db: DbClient,
    pub(crate) config: EngineConfig,
    pub(crate) invalidator: Arc<dyn CacheInvalidator>
}

impl RatingEngine {
    pub fn new(db: DbClient, config: EngineConfig, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        RatingEngine {
            db,
            config,
            invalidator
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &DbClient {
        &self.db
    }

    /// Recalculates every user and appends a snapshot batch per scope.
    pub async fn recalculate_all(&self) -> Result<RecalculationReport> {
        info!("Starting full recalculation");
        let report = self.with_timeout(self.run(None)).await?;

        invalidate_everything(self.invalidator.as_ref()).await;

        info!(
            "Full recalculation finished: {} users, {} snapshot rows in {}ms",
            report.users_written, report.snapshot_rows, report.elapsed_ms
        );
        Ok(report)
    }

    /// Recalculates only `users`. No snapshots are written.
    pub async fn recalculate_users(&self, users: &[i32]) -> Result<RecalculationReport> {
        let mut users = users.to_vec();
        users.sort_unstable();
        users.dedup();

        info!("Starting targeted recalculation for {} users", users.len());
        let report = self.with_timeout(self.run(Some(users.as_slice()))).await?;

        invalidate_users(self.invalidator.as_ref(), &users).await;

        info!(
            "Targeted recalculation finished: {} users in {}ms",
            report.users_written, report.elapsed_ms
        );
        Ok(report)
    }

    /// Persisted summary plus streak state and accuracy, `None` for unknown users.
    pub async fn user_summary(&self, user_id: i32) -> Result<Option<RatingView>> {
        let client = self.db.lock().await;
        DbClient::get_rating_view(&*client, user_id).await
    }

    pub(crate) async fn with_timeout<T>(&self, unit: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.transaction_timeout;

        // Dropping the unit drops its open transaction, which rolls it back
        tokio::time::timeout(timeout, unit)
            .await
            .map_err(|_| DbError::Timeout(timeout))?
    }

    async fn run(&self, users: Option<&[i32]>) -> Result<RecalculationReport> {
        let started = Instant::now();
        let full = users.is_none();

        let mut client = self.db.lock().await;
        let tx = DbClient::begin(&mut client, self.config.transaction_timeout, false).await?;

        let anchor = Utc::now();
        let settings = DbClient::get_scope_settings(&tx).await?;
        let overrides = DbClient::get_season_overrides(&tx).await?;
        let windows = resolve_windows(anchor, &settings, &overrides);
        debug!("Resolved windows: {:?}", windows);

        let stats = extract_stats(&tx, users, &windows).await?;
        let sums = adjustment_sums(&tx, users).await?;
        let board = Leaderboard::assign(merge_all(stats, &sums));

        let summaries = board.summaries(anchor);
        let streaks = board.streak_states();

        let bar = full.then(|| progress_bar((summaries.len() + streaks.len()) as u64, "Saving ratings"));
        save_summaries(&tx, &summaries, self.config.write_wave_size, bar.as_ref()).await?;
        save_streaks(&tx, &streaks, self.config.write_wave_size, bar.as_ref()).await?;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let mut snapshot_rows = 0;
        if full {
            for scope in Scope::iter() {
                let batch = board.snapshot(scope, self.config.snapshot_cap, anchor);
                snapshot_rows += save_snapshots(&tx, &batch, self.config.write_wave_size).await?;
            }
            save_run(&tx, &windows, board.len(), snapshot_rows).await?;
        } else if !board.is_empty() {
            rerank_mythic(&tx).await?;
        }

        tx.commit().await?;

        Ok(RecalculationReport {
            full,
            users_written: board.len(),
            snapshot_rows,
            windows,
            recalculated_at: anchor,
            elapsed_ms: started.elapsed().as_millis() as u64
        })
    }
}

#[async_trait]
impl Recalculator for RatingEngine {
    async fn recalculate_users(&self, users: &[i32]) -> Result<RecalculationReport> {
        RatingEngine::recalculate_users(self, users).await
    }
}
