use chrono::Utc;
use tracing::{debug, info};

use super::{config::EngineConfig, recalculation::RatingEngine};
use crate::{
    database::{
        db::DbClient,
        db_structs::{LeaderboardEntry, LeaderboardPage},
        error::Result
    },
    model::{structures::scope::Scope, window::resolve_windows}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub scope: Scope,
    /// 1-based
    pub page: i64,
    pub page_size: i64,
    /// Run a full recalculation before reading. Honoured on page 1 only.
    pub ensure_fresh: bool
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        LeaderboardQuery {
            scope: Scope::Global,
            page: 1,
            page_size: 25,
            ensure_fresh: false
        }
    }
}

/// Page coordinates after clamping to the configured maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub page: i64,
    pub page_size: i64,
    pub offset: i64
}

pub fn clamp_page(page: i64, page_size: i64, config: &EngineConfig) -> PageBounds {
    let max_page_size = config.max_page_size.max(1);
    let page = page.clamp(1, config.max_page.max(1));
    let page_size = page_size.clamp(1, max_page_size);

    PageBounds {
        page,
        page_size,
        offset: (page - 1) * page_size
    }
}

impl RatingEngine {
    /// One page of a scope's leaderboard, ordered by the scope's point column.
    pub async fn leaderboard(&self, query: LeaderboardQuery) -> Result<LeaderboardPage> {
        let bounds = clamp_page(query.page, query.page_size, &self.config);

        if query.ensure_fresh && bounds.page == 1 {
            info!("Fresh {} leaderboard requested, recalculating first", query.scope);
            self.recalculate_all().await?;
        }

        let mut client = self.db.lock().await;
        let tx = DbClient::begin(&mut client, self.config.transaction_timeout, true).await?;

        // Points on the page were scored with the last full run's windows
        let windows = match DbClient::get_last_full_run_windows(&tx).await? {
            Some(windows) => windows,
            None => {
                let settings = DbClient::get_scope_settings(&tx).await?;
                let overrides = DbClient::get_season_overrides(&tx).await?;
                resolve_windows(Utc::now(), &settings, &overrides)
            }
        };

        let (views, total) =
            DbClient::get_leaderboard_rows(&tx, query.scope, bounds.offset, bounds.page_size).await?;
        tx.commit().await?;

        let captured_at = views
            .iter()
            .map(|v| v.summary.last_recalculated_at)
            .max()
            .unwrap_or_else(Utc::now);

        let entries: Vec<LeaderboardEntry> = views
            .into_iter()
            .enumerate()
            .map(|(i, rating)| LeaderboardEntry {
                rank: bounds.offset + i as i64 + 1,
                points: rating.summary.points(query.scope),
                rating
            })
            .collect();

        debug!(
            "Read {} leaderboard page {} ({} of {} entries)",
            query.scope,
            bounds.page,
            entries.len(),
            total
        );

        Ok(LeaderboardPage {
            scope: query.scope,
            page: bounds.page,
            page_size: bounds.page_size,
            total,
            entries,
            windows,
            captured_at
        })
    }
}
