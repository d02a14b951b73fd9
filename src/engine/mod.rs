pub mod config;
pub mod leaderboard;
pub mod recalculation;
pub mod rewards;

pub use config::EngineConfig;
pub use leaderboard::LeaderboardQuery;
pub use recalculation::{RatingEngine, RecalculationReport, Recalculator};
pub use rewards::{RewardBatchReport, RewardProcessor};
