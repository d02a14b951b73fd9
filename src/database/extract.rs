//! Aggregate passes over resolved prediction entries and point adjustments.
//!
//! Every query takes an optional user filter: `None` covers the whole population, `Some`
//! restricts a targeted recalculation to the given ids.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use postgres_types::ToSql;
use tokio_postgres::GenericClient;
use tracing::{debug, warn};

use super::{
    db_structs::{AdjustmentSum, ExtractedStats},
    error::Result
};
use crate::model::{
    streak::{compute_streaks, ResolvedOutcome},
    structures::{entry_status::EntryStatus, scope::scope_from_nullable},
    window::{ResolvedWindows, Window}
};

// An entry participates once it is terminal, scored and resolved
const PARTICIPATING: &str = "status = ANY($1) AND score_awarded IS NOT NULL AND resolved_at IS NOT NULL";
const USER_FILTER: &str = "($2::int4[] IS NULL OR user_id = ANY($2))";

#[derive(Debug, Clone, Default)]
struct Activity {
    last_prediction_at: Option<DateTime<Utc>>,
    last_resolved_at: Option<DateTime<Utc>>,
    resolved_count: i64,
    won_count: i64
}

/// (a) all-time score sum per user
pub async fn all_time_sums(client: &impl GenericClient, users: Option<&[i32]>) -> Result<HashMap<i32, i64>> {
    let query = format!(
        "SELECT user_id, COALESCE(SUM(score_awarded), 0)::bigint AS points FROM prediction_entries \
         WHERE {} AND {} GROUP BY user_id",
        PARTICIPATING, USER_FILTER
    );
    let users = users.map(|u| u.to_vec());
    let rows = client
        .query(query.as_str(), &[&EntryStatus::terminal_codes(), &users])
        .await?;

    Ok(rows.iter().map(|row| (row.get("user_id"), row.get("points"))).collect())
}

/// (b)/(c) score sum per user for entries resolved inside `window`
pub async fn window_sums(
    client: &impl GenericClient,
    users: Option<&[i32]>,
    window: &Window
) -> Result<HashMap<i32, i64>> {
    let query = format!(
        "SELECT user_id, COALESCE(SUM(score_awarded), 0)::bigint AS points FROM prediction_entries \
         WHERE {} AND {} AND resolved_at BETWEEN $3 AND $4 GROUP BY user_id",
        PARTICIPATING, USER_FILTER
    );
    let users = users.map(|u| u.to_vec());
    let params: [&(dyn ToSql + Sync); 4] = [&EntryStatus::terminal_codes(), &users, &window.start, &window.end];
    let rows = client.query(query.as_str(), &params).await?;

    Ok(rows.iter().map(|row| (row.get("user_id"), row.get("points"))).collect())
}

/// (d) activity timestamps and resolved/won counts. Every user with at least one entry,
/// resolved or not, appears here.
async fn activity(client: &impl GenericClient, users: Option<&[i32]>) -> Result<HashMap<i32, Activity>> {
    let query = format!(
        "SELECT user_id, \
                MAX(submitted_at) AS last_prediction_at, \
                MAX(resolved_at) FILTER (WHERE {p}) AS last_resolved_at, \
                COUNT(*) FILTER (WHERE {p}) AS resolved_count, \
                COUNT(*) FILTER (WHERE {p} AND status = $3) AS won_count \
         FROM prediction_entries WHERE {f} GROUP BY user_id",
        p = PARTICIPATING,
        f = USER_FILTER
    );
    let users = users.map(|u| u.to_vec());
    let won = EntryStatus::Won as i32;
    let params: [&(dyn ToSql + Sync); 3] = [&EntryStatus::terminal_codes(), &users, &won];
    let rows = client.query(query.as_str(), &params).await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("user_id"),
                Activity {
                    last_prediction_at: row.get("last_prediction_at"),
                    last_resolved_at: row.get("last_resolved_at"),
                    resolved_count: row.get("resolved_count"),
                    won_count: row.get("won_count")
                }
            )
        })
        .collect())
}

/// Participating outcomes grouped per user, in resolution order.
pub async fn resolved_outcomes(
    client: &impl GenericClient,
    users: Option<&[i32]>
) -> Result<HashMap<i32, Vec<ResolvedOutcome>>> {
    let query = format!(
        "SELECT user_id, id, resolved_at, status FROM prediction_entries \
         WHERE {} AND {} ORDER BY user_id, resolved_at, id",
        PARTICIPATING, USER_FILTER
    );
    let users = users.map(|u| u.to_vec());
    let rows = client
        .query(query.as_str(), &[&EntryStatus::terminal_codes(), &users])
        .await?;

    let mut outcomes: HashMap<i32, Vec<ResolvedOutcome>> = HashMap::new();
    for row in rows {
        let won = EntryStatus::try_from(row.get::<_, i32>("status"))
            .map(|s| s.is_win())
            .unwrap_or(false);

        outcomes.entry(row.get("user_id")).or_default().push(ResolvedOutcome {
            entry_id: row.get("id"),
            resolved_at: row.get("resolved_at"),
            won
        });
    }

    Ok(outcomes)
}

/// Adjustment deltas summed per user and scope.
pub async fn adjustment_sums(client: &impl GenericClient, users: Option<&[i32]>) -> Result<Vec<AdjustmentSum>> {
    let users = users.map(|u| u.to_vec());
    let rows = client
        .query(
            "SELECT user_id, scope, COALESCE(SUM(delta), 0)::bigint AS delta FROM point_adjustments \
             WHERE ($1::int4[] IS NULL OR user_id = ANY($1)) GROUP BY user_id, scope",
            &[&users]
        )
        .await?;

    let mut sums = Vec::with_capacity(rows.len());
    for row in rows {
        let user_id: i32 = row.get("user_id");
        match scope_from_nullable(row.get("scope")) {
            Ok(scope) => sums.push(AdjustmentSum {
                user_id,
                scope,
                delta: row.get("delta")
            }),
            Err(_) => warn!("Skipping adjustments for user {} with an unknown scope", user_id)
        }
    }

    Ok(sums)
}

/// Runs every extraction pass and joins the results per user.
pub async fn extract_stats(
    client: &impl GenericClient,
    users: Option<&[i32]>,
    windows: &ResolvedWindows
) -> Result<Vec<ExtractedStats>> {
    let all_time = all_time_sums(client, users).await?;
    let current = window_sums(client, users, &windows.current).await?;
    let yearly = window_sums(client, users, &windows.yearly).await?;
    let activity = activity(client, users).await?;
    let outcomes = resolved_outcomes(client, users).await?;

    let streaks = compute_streaks(&outcomes);

    debug!(
        "Extracted {} users ({} with resolved entries)",
        activity.len(),
        outcomes.len()
    );

    let stats = activity
        .into_iter()
        .map(|(user_id, a)| ExtractedStats {
            user_id,
            all_time_points: all_time.get(&user_id).copied().unwrap_or(0),
            current_window_points: current.get(&user_id).copied().unwrap_or(0),
            yearly_window_points: yearly.get(&user_id).copied().unwrap_or(0),
            prediction_count: a.resolved_count,
            prediction_wins: a.won_count,
            last_prediction_at: a.last_prediction_at,
            last_resolved_at: a.last_resolved_at,
            streak: streaks.get(&user_id).copied().unwrap_or_default()
        })
        .collect();

    Ok(stats)
}
