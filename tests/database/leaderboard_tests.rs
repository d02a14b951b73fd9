use pickem_ranker::{
    engine::{EngineConfig, LeaderboardQuery},
    model::structures::scope::Scope
};
use serial_test::serial;

use super::test_helpers::{days_ago, insert_adjustment, insert_entry, seed_population, TestDatabase, WON};
use crate::common::init_test_env;

#[tokio::test]
#[serial]
async fn test_pages_concatenate_to_one_large_page() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();

    for user_id in 1..=23 {
        insert_entry(&client, user_id, Some(user_id * 7 % 40), WON, Some(days_ago(user_id as i64))).await;
        insert_adjustment(&client, user_id, (user_id % 5) as i64, Some(1)).await;
    }

    let engine = test_db.engine(EngineConfig::default()).await;
    engine.recalculate_all().await.unwrap();

    for scope in [Scope::Global, Scope::Current, Scope::Yearly] {
        let mut concatenated = Vec::new();
        for page in 1..=5 {
            let result = engine
                .leaderboard(LeaderboardQuery {
                    scope,
                    page,
                    page_size: 5,
                    ensure_fresh: false
                })
                .await
                .unwrap();
            assert_eq!(result.total, 23);
            concatenated.extend(result.entries);
        }

        let single = engine
            .leaderboard(LeaderboardQuery {
                scope,
                page: 1,
                page_size: 25,
                ensure_fresh: false
            })
            .await
            .unwrap();

        assert_eq!(concatenated, single.entries);
        assert_eq!(
            single.entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            (1..=23).collect::<Vec<i64>>()
        );
        assert!(single.entries.windows(2).all(|w| w[0].points >= w[1].points));
    }
}

#[tokio::test]
#[serial]
async fn test_page_metadata() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db
        .engine(EngineConfig {
            max_page_size: 2,
            ..Default::default()
        })
        .await;
    let report = engine.recalculate_all().await.unwrap();

    let page = engine
        .leaderboard(LeaderboardQuery {
            scope: Scope::Current,
            page: 1,
            page_size: 50,
            ensure_fresh: false
        })
        .await
        .unwrap();

    assert_eq!(page.page_size, 2);
    assert_eq!(page.total, 3);
    assert_eq!(page.entries.len(), 2);
    assert_eq!(page.entries[0].rating.summary.user_id, 3);
    assert_eq!(page.entries[0].points, 100);
    assert_eq!(page.captured_at, page.entries[0].rating.summary.last_recalculated_at);
    assert_eq!(
        page.captured_at.timestamp_micros(),
        report.recalculated_at.timestamp_micros()
    );
    assert!(page.etag().starts_with("W/\"current-1-2-3-"));
}

#[tokio::test]
#[serial]
async fn test_ensure_fresh_recalculates_first_page_only() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db.engine(EngineConfig::default()).await;

    let second = engine
        .leaderboard(LeaderboardQuery {
            page: 2,
            ensure_fresh: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second.total, 0);
    assert!(second.entries.is_empty());

    let first = engine
        .leaderboard(LeaderboardQuery {
            ensure_fresh: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.entries[0].rating.summary.user_id, 3);
}

#[tokio::test]
#[serial]
async fn test_page_windows_are_those_of_last_full_run() {
    init_test_env();
    let test_db = TestDatabase::new().await.expect("Failed to create test database");
    let client = test_db.get_client().await.unwrap();
    seed_population(&client).await;

    let engine = test_db.engine(EngineConfig::default()).await;
    let report = engine.recalculate_all().await.unwrap();

    // Settings change after the run; the page still reports the windows that scored it
    client
        .execute(
            "INSERT INTO ranking_settings (id, current_scope_days, yearly_scope_days) VALUES (1, 3, 10)",
            &[]
        )
        .await
        .unwrap();

    let page = engine
        .leaderboard(LeaderboardQuery {
            scope: Scope::Current,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page.windows, report.windows);
    assert_eq!(page.windows.anchor, report.recalculated_at);

    // Targeted runs do not replace the recorded windows
    engine.recalculate_users(&[1]).await.unwrap();
    let page = engine.leaderboard(LeaderboardQuery::default()).await.unwrap();
    assert_eq!(page.windows, report.windows);

    let next = engine.recalculate_all().await.unwrap();
    let page = engine.leaderboard(LeaderboardQuery::default()).await.unwrap();
    assert_eq!(page.windows, next.windows);
    assert_eq!(page.windows.current.start, next.recalculated_at - chrono::Duration::days(3));
}
