use super::{
    db_structs::{LeaderboardSnapshot, RatingView, RewardPayload, StreakState, UserRatingSummary},
    error::{DbError, Result}
};
use crate::model::{
    structures::{
        job_status::JobStatus,
        rating_level::RatingLevel,
        scope::{scope_to_nullable, Scope}
    },
    window::{ResolvedWindows, ScopeSettings, SeasonOverride}
};
use chrono::{DateTime, Utc};
use postgres_types::ToSql;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::{Client, GenericClient, IsolationLevel, NoTls, Row, Transaction};
use tracing::{debug, error, info, warn};

/// Tables the engine reads or writes. Checked once on connect.
pub const REQUIRED_TABLES: [&str; 10] = [
    "prediction_entries",
    "point_adjustments",
    "ranking_settings",
    "season_overrides",
    "user_rating_summaries",
    "user_streaks",
    "leaderboard_snapshots",
    "reward_jobs",
    "achievement_rewards",
    "ranking_runs"
];

/// A single PostgreSQL connection.
///
/// Clones share the connection and take turns on it. Workers that should run concurrently
/// (recalculations, reward processing) each open their own client with [`DbClient::connect`].
#[derive(Clone)]
pub struct DbClient {
    client: Arc<Mutex<Client>>
}

impl DbClient {
    /// Connects and verifies that every required table exists.
    pub async fn connect(connection_str: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        let db = DbClient {
            client: Arc::new(Mutex::new(client))
        };
        db.verify_schema().await?;

        Ok(db)
    }

    pub async fn verify_schema(&self) -> Result<()> {
        let client = self.lock().await;
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name::text = ANY($1::text[])",
                &[&REQUIRED_TABLES.to_vec()]
            )
            .await?;

        let present: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
        let missing: Vec<String> = REQUIRED_TABLES
            .iter()
            .filter(|table| !present.iter().any(|p| p == *table))
            .map(|table| table.to_string())
            .collect();

        if !missing.is_empty() {
            error!("Schema check failed, missing tables: {:?}", missing);
            return Err(DbError::SchemaMissing(missing));
        }

        debug!("Schema check passed");
        Ok(())
    }

    /// Exclusive access to the underlying connection, e.g. to open a transaction.
    pub async fn lock(&self) -> MutexGuard<'_, Client> {
        self.client.lock().await
    }

    /// Opens a REPEATABLE READ transaction so every query in it sees one snapshot. The
    /// server-side statement timeout is bounded by `timeout` as well.
    pub async fn begin<'a>(client: &'a mut Client, timeout: Duration, read_only: bool) -> Result<Transaction<'a>> {
        Self::begin_with(client, timeout, IsolationLevel::RepeatableRead, read_only).await
    }

    /// Like [`DbClient::begin`] with an explicit isolation level. Queue writes use READ
    /// COMMITTED so `ON CONFLICT DO NOTHING` sees rows committed by concurrent workers.
    pub async fn begin_with<'a>(
        client: &'a mut Client,
        timeout: Duration,
        isolation: IsolationLevel,
        read_only: bool
    ) -> Result<Transaction<'a>> {
        let tx = client
            .build_transaction()
            .isolation_level(isolation)
            .read_only(read_only)
            .start()
            .await?;

        tx.batch_execute(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1)))
            .await?;

        Ok(tx)
    }

    /// Reads the scope settings row. A missing row or NULL columns fall back to defaults.
    pub async fn get_scope_settings(client: &impl GenericClient) -> Result<ScopeSettings> {
        let row = client
            .query_opt(
                "SELECT current_scope_days, yearly_scope_days, min_scope_days, max_scope_days \
                 FROM ranking_settings WHERE id = 1",
                &[]
            )
            .await?;

        match row {
            Some(row) => {
                let field = |name: &str| row.get::<_, Option<i32>>(name).map(i64::from);
                Ok(ScopeSettings::from_partial(
                    field("current_scope_days"),
                    field("yearly_scope_days"),
                    field("min_scope_days"),
                    field("max_scope_days")
                ))
            }
            None => {
                warn!("No ranking_settings row found, using default scope lengths");
                Ok(ScopeSettings::default())
            }
        }
    }

    pub async fn get_season_overrides(client: &impl GenericClient) -> Result<Vec<SeasonOverride>> {
        let rows = client
            .query(
                "SELECT id, scope, name, starts_at, ends_at, is_active FROM season_overrides WHERE is_active",
                &[]
            )
            .await?;

        let mut overrides = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.get("id");
            match Scope::try_from(row.get::<_, i32>("scope")) {
                Ok(scope) if scope.is_windowed() => overrides.push(SeasonOverride {
                    id,
                    scope,
                    name: row.get("name"),
                    starts_at: row.get("starts_at"),
                    ends_at: row.get("ends_at"),
                    is_active: row.get("is_active")
                }),
                _ => warn!("Ignoring season override {} with an unusable scope", id)
            }
        }

        Ok(overrides)
    }

    /// Summary joined with streak state for one user.
    pub async fn get_rating_view(client: &impl GenericClient, user_id: i32) -> Result<Option<RatingView>> {
        let query = format!("{} WHERE s.user_id = $1", RATING_VIEW_SELECT);
        let row = client.query_opt(query.as_str(), &[&user_id]).await?;

        row.map(|row| rating_view_from_row(&row)).transpose()
    }

    /// One page of a scope's leaderboard plus the population size.
    pub async fn get_leaderboard_rows(
        client: &impl GenericClient,
        scope: Scope,
        offset: i64,
        limit: i64
    ) -> Result<(Vec<RatingView>, i64)> {
        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM user_rating_summaries", &[])
            .await?
            .get(0);

        let query = format!(
            "{} ORDER BY {} LIMIT $1 OFFSET $2",
            RATING_VIEW_SELECT,
            scope.order_by_clause()
        );
        let rows = client.query(query.as_str(), &[&limit, &offset]).await?;

        let views = rows.iter().map(rating_view_from_row).collect::<Result<Vec<_>>>()?;

        Ok((views, total))
    }

    /// A stored snapshot batch. Without `captured_at` the most recent batch is returned.
    pub async fn get_snapshots(
        client: &impl GenericClient,
        scope: Scope,
        captured_at: Option<DateTime<Utc>>
    ) -> Result<Vec<LeaderboardSnapshot>> {
        let rows = client
            .query(
                "SELECT user_id, scope, rank, points, captured_at, payload FROM leaderboard_snapshots \
                 WHERE scope = $1 AND captured_at = COALESCE($2, \
                    (SELECT MAX(captured_at) FROM leaderboard_snapshots WHERE scope = $1)) \
                 ORDER BY rank",
                &[&(scope as i32), &captured_at]
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(LeaderboardSnapshot {
                    user_id: row.get("user_id"),
                    scope,
                    rank: row.get("rank"),
                    points: row.get("points"),
                    captured_at: row.get("captured_at"),
                    payload: row.get("payload")
                })
            })
            .collect()
    }

    /// Enqueues a PENDING reward job and returns its id.
    /// Windows the most recent full recalculation scored with, `None` before the first run.
    pub async fn get_last_full_run_windows(client: &impl GenericClient) -> Result<Option<ResolvedWindows>> {
        let row = client
            .query_opt(
                "SELECT windows FROM ranking_runs ORDER BY recalculated_at DESC, id DESC LIMIT 1",
                &[]
            )
            .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.get("windows"))?)),
            None => Ok(None)
        }
    }

    pub async fn create_reward_job(&self, payload: &RewardPayload) -> Result<i64> {
        let client = self.lock().await;
        let json = serde_json::to_value(payload)?;

        let id: i64 = client
            .query_one(
                "INSERT INTO reward_jobs (payload, status, attempts) VALUES ($1, $2, 0) RETURNING id",
                &[&json, &(JobStatus::Pending as i32)]
            )
            .await?
            .get(0);

        info!(
            "Enqueued reward job {} for user {} ({} tier {}, {})",
            id, payload.user_id, payload.group, payload.tier, payload.scope_year
        );
        Ok(id)
    }

    /// Convenience for admin tooling and tests: records a manual adjustment.
    pub async fn insert_adjustment(
        client: &impl GenericClient,
        user_id: i32,
        delta: i64,
        scope: Scope,
        reason: &str
    ) -> Result<()> {
        let scope_code = scope_to_nullable(scope);
        let params: [&(dyn ToSql + Sync); 4] = [&user_id, &delta, &scope_code, &reason];
        client
            .execute(
                "INSERT INTO point_adjustments (user_id, delta, scope, reason) VALUES ($1, $2, $3, $4)",
                &params
            )
            .await?;

        Ok(())
    }
}

const RATING_VIEW_SELECT: &str = "SELECT s.user_id, s.total_points, s.seasonal_points, s.yearly_points, s.level, \
     s.mythic_rank, s.prediction_count, s.prediction_wins, s.last_recalculated_at, \
     COALESCE(st.current_streak, 0) AS current_streak, COALESCE(st.max_streak, 0) AS max_streak, \
     st.last_prediction_at, st.last_resolved_at \
     FROM user_rating_summaries s LEFT JOIN user_streaks st ON st.user_id = s.user_id";

fn rating_view_from_row(row: &Row) -> Result<RatingView> {
    let user_id: i32 = row.get("user_id");
    let level_code: i32 = row.get("level");
    let level = RatingLevel::try_from(level_code)
        .map_err(|_| DbError::InvalidRow(format!("user {} has unknown level {}", user_id, level_code)))?;

    let summary = UserRatingSummary {
        user_id,
        total_points: row.get("total_points"),
        seasonal_points: row.get("seasonal_points"),
        yearly_points: row.get("yearly_points"),
        level,
        mythic_rank: row.get("mythic_rank"),
        prediction_count: row.get("prediction_count"),
        prediction_wins: row.get("prediction_wins"),
        last_recalculated_at: row.get("last_recalculated_at")
    };
    let streak = StreakState {
        user_id,
        current_streak: row.get("current_streak"),
        max_streak: row.get("max_streak"),
        last_prediction_at: row.get("last_prediction_at"),
        last_resolved_at: row.get("last_resolved_at")
    };

    Ok(RatingView {
        accuracy: accuracy(summary.prediction_wins, summary.prediction_count),
        summary,
        streak
    })
}

/// `wins / resolved`, 0 when nothing has resolved.
pub fn accuracy(wins: i64, resolved: i64) -> f64 {
    if resolved <= 0 {
        0.0
    } else {
        wins as f64 / resolved as f64
    }
}
