use pickem_ranker::{
    database::{db::DbClient, error::DbError},
    engine::EngineConfig,
    model::{
        structures::{rating_level::RatingLevel, scope::Scope},
        window::WindowSource
    }
};
use serial_test::serial;
use std::time::Duration;

use super::test_helpers::{days_ago, insert_adjustment, insert_entry, seed_population, TestDatabase, LOST, WON};
use crate::common::init_test_env;

async fn summary_rows(client: &tokio_postgres::Client) -> Vec<(i32, i64, i64, i64, i32, Option<i32>, i64, i64)> {
    client
        .query(
            "SELECT user_id, total_points, seasonal_points, yearly_points, level, mythic_rank, \
             prediction_count, prediction_wins FROM user_rating_summaries ORDER BY user_id",
            &[]
        )
        .await
        .expect("Failed to read summaries")
        .iter()
        .map(|r| (r.get(0), r.get(1), r.get(2), r.get(3), r.get(4), r.get(5), r.get(6), r.get(7)))
        .collect()
}

#[tokio::test]
#[serial]
async fn test_full_recalculation_merges_windows_and_adjustments() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db.engine(EngineConfig::default()).await;
    let report = engine.recalculate_all().await.expect("Recalculation failed");

    assert!(report.full);
    assert_eq!(report.users_written, 3);

    let rows = summary_rows(&client).await;
    assert_eq!(rows[0], (1, 65, 42, 65, RatingLevel::Rookie as i32, None, 4, 3));
    assert_eq!(rows[1], (2, 50, 50, 47, RatingLevel::Rookie as i32, None, 2, 1));
    assert_eq!(rows[2], (3, 100, 100, 100, RatingLevel::Contender as i32, None, 0, 0));

    let one = engine.user_summary(1).await.unwrap().expect("Missing summary");
    assert_eq!(one.streak.max_streak, 2);
    assert_eq!(one.streak.current_streak, 1);
    assert!((one.accuracy - 0.75).abs() < 1e-9);

    let two = engine.user_summary(2).await.unwrap().expect("Missing summary");
    assert_eq!(two.streak.max_streak, 1);
    assert_eq!(two.streak.current_streak, 0);

    assert!(engine.user_summary(404).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_recalculation_is_idempotent() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db.engine(EngineConfig::default()).await;
    engine.recalculate_all().await.unwrap();
    let first = summary_rows(&client).await;

    engine.recalculate_all().await.unwrap();
    let second = summary_rows(&client).await;

    assert_eq!(first, second);
}

#[tokio::test]
#[serial]
async fn test_full_recalculation_appends_capped_snapshots() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db
        .engine(EngineConfig {
            snapshot_cap: 2,
            ..Default::default()
        })
        .await;

    let report = engine.recalculate_all().await.unwrap();
    assert_eq!(report.snapshot_rows, 6);

    let global = DbClient::get_snapshots(&client, Scope::Global, None).await.unwrap();
    assert_eq!(global.iter().map(|s| s.user_id).collect::<Vec<_>>(), vec![3, 1]);
    assert!(global.iter().all(|s| s.captured_at == global[0].captured_at));

    let yearly = DbClient::get_snapshots(&client, Scope::Yearly, None).await.unwrap();
    assert_eq!(yearly.iter().map(|s| s.points).collect::<Vec<_>>(), vec![100, 65]);

    // A second run appends a new batch; the first is kept
    engine.recalculate_all().await.unwrap();
    let count: i64 = client
        .query_one("SELECT COUNT(*) FROM leaderboard_snapshots", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(count, 12);

    let first_batch = DbClient::get_snapshots(&client, Scope::Global, Some(global[0].captured_at))
        .await
        .unwrap();
    assert_eq!(first_batch, global);
}

#[tokio::test]
#[serial]
async fn test_targeted_recalculation_skips_snapshots_and_other_users() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db.engine(EngineConfig::default()).await;
    let report = engine.recalculate_users(&[2, 2]).await.unwrap();

    assert!(!report.full);
    assert_eq!(report.users_written, 1);
    assert_eq!(report.snapshot_rows, 0);

    let rows = summary_rows(&client).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 2);

    let snapshots: i64 = client
        .query_one("SELECT COUNT(*) FROM leaderboard_snapshots", &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(snapshots, 0);
}

#[tokio::test]
#[serial]
async fn test_mythic_ranks_stay_dense_after_targeted_recalculation() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;
    insert_adjustment(&client, 1, 20_000, None).await;
    insert_adjustment(&client, 2, 30_000, None).await;

    let engine = test_db.engine(EngineConfig::default()).await;
    engine.recalculate_all().await.unwrap();

    let ranks = |rows: Vec<(i32, i64, i64, i64, i32, Option<i32>, i64, i64)>| {
        rows.iter().map(|r| (r.0, r.5)).collect::<Vec<_>>()
    };
    assert_eq!(ranks(summary_rows(&client).await), vec![(1, Some(2)), (2, Some(1)), (3, None)]);

    // User 3 overtakes both
    insert_adjustment(&client, 3, 50_000, None).await;
    engine.recalculate_users(&[3]).await.unwrap();

    assert_eq!(
        ranks(summary_rows(&client).await),
        vec![(1, Some(3)), (2, Some(2)), (3, Some(1))]
    );
}

#[tokio::test]
#[serial]
async fn test_season_override_replaces_rolling_window() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();

    insert_entry(&client, 1, Some(10), WON, Some(days_ago(50))).await;
    insert_entry(&client, 1, Some(20), WON, Some(days_ago(5))).await;
    insert_entry(&client, 1, Some(0), LOST, Some(days_ago(4))).await;

    // Season started 60 days ago, so the 50-day-old entry counts towards the current scope
    client
        .execute(
            "INSERT INTO season_overrides (scope, name, starts_at, ends_at, is_active) VALUES (1, 'Spring', $1, NULL, TRUE)",
            &[&days_ago(60)]
        )
        .await
        .unwrap();

    let engine = test_db.engine(EngineConfig::default()).await;
    let report = engine.recalculate_all().await.unwrap();
    assert!(matches!(report.windows.current.source, WindowSource::Season { .. }));
    assert!(matches!(report.windows.yearly.source, WindowSource::Rolling { days: 365 }));

    let rows = summary_rows(&client).await;
    assert_eq!(rows[0].2, 30);

    // Shorter rolling scope lengths apply to the yearly window only now
    client
        .execute(
            "INSERT INTO ranking_settings (id, current_scope_days, yearly_scope_days) VALUES (1, 3, 10)",
            &[]
        )
        .await
        .unwrap();
    engine.recalculate_all().await.unwrap();

    let rows = summary_rows(&client).await;
    assert_eq!(rows[0].2, 30);
    assert_eq!(rows[0].3, 20);
}

#[tokio::test]
#[serial]
async fn test_timeout_rolls_back_everything() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db
        .engine(EngineConfig {
            transaction_timeout: Duration::from_nanos(1),
            ..Default::default()
        })
        .await;

    let err = engine.recalculate_all().await.expect_err("Recalculation should time out");
    assert!(err.is_transient(), "unexpected error: {}", err);

    assert!(summary_rows(&client).await.is_empty());
}

#[tokio::test]
#[serial]
async fn test_connect_fails_fast_without_schema() {
    init_test_env();
    let test_db = TestDatabase::empty().await.expect("Failed to create test database");

    match DbClient::connect(&test_db.connection_string).await {
        Err(DbError::SchemaMissing(missing)) => {
            assert_eq!(missing.len(), 10);
            assert!(missing.contains(&"reward_jobs".to_string()));
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connect should fail without schema")
    }
}
