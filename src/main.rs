use clap::Parser;
use pickem_ranker::{
    args::{Args, Command},
    database::{
        db::DbClient,
        db_structs::RewardPayload,
        error::DbError,
        reward_queue::PgRewardQueue
    },
    engine::{LeaderboardQuery, RatingEngine, RewardProcessor},
    messaging::invalidator_from_env
};
use serde::Serialize;
use std::{process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if e.is_transient() {
                info!("The error is transient, the command can be retried");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DbError> {
    let config = args.engine_config();
    let db = DbClient::connect(&args.connection_string).await?;
    let invalidator = invalidator_from_env().await;
    let engine = RatingEngine::new(db.clone(), config.clone(), invalidator.clone());

    match args.command {
        Command::Recalculate { user_ids } if user_ids.is_empty() => print_json(&engine.recalculate_all().await?),
        Command::Recalculate { user_ids } => print_json(&engine.recalculate_users(&user_ids).await?),
        Command::Leaderboard {
            scope,
            page,
            page_size,
            ensure_fresh
        } => {
            let page = engine
                .leaderboard(LeaderboardQuery {
                    scope,
                    page,
                    page_size,
                    ensure_fresh
                })
                .await?;
            info!("ETag {}", page.etag());
            print_json(&page)
        }
        Command::Summary { user_id } => match engine.user_summary(user_id).await? {
            Some(view) => print_json(&view),
            None => {
                info!("User {} has no rating summary", user_id);
                print_json(&serde_json::Value::Null)
            }
        },
        Command::EnqueueReward {
            user_id,
            group,
            tier,
            points,
            scope_year
        } => {
            let id = db
                .create_reward_job(&RewardPayload {
                    user_id,
                    group,
                    tier,
                    points,
                    scope_year
                })
                .await?;
            print_json(&serde_json::json!({ "jobId": id }))
        }
        Command::ProcessRewards { limit } => {
            let queue = Arc::new(PgRewardQueue::new(db, config.transaction_timeout).with_lease(config.reward_lease));
            let processor =
                RewardProcessor::new(queue, Arc::new(engine), invalidator, config.reward_max_attempts);
            print_json(&processor.process_pending(limit).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DbError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
