use std::time::Duration;

/// Tuning knobs of the engine. Ranking settings proper (scope lengths) live in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for one recalculation or reward transaction
    pub transaction_timeout: Duration,
    /// Statements in flight per persistence wave
    pub write_wave_size: usize,
    /// Snapshot rows kept per scope and full recalculation
    pub snapshot_cap: usize,
    pub max_page_size: i64,
    pub max_page: i64,
    pub reward_max_attempts: i32,
    /// How long a claimed reward job may stay in PROCESSING before another claim recovers it
    pub reward_lease: Duration
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            transaction_timeout: Duration::from_secs(60),
            write_wave_size: 100,
            snapshot_cap: 100,
            max_page_size: 100,
            max_page: 500,
            reward_max_attempts: 5,
            reward_lease: Duration::from_secs(300)
        }
    }
}
