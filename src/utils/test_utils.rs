use crate::{
    database::{
        db_structs::{AdjustmentSum, ExtractedStats, RewardJob, RewardOutcome, RewardPayload},
        error::{DbError, Result},
        reward_queue::{RewardQueue, LEASE_EXPIRED_MESSAGE}
    },
    engine::recalculation::{RecalculationReport, Recalculator},
    messaging::{CacheInvalidator, PublisherError},
    model::{
        merge::{merge, merge_all, AdjustmentTotals, MergedEntry},
        streak::{ResolvedOutcome, Streak},
        structures::{job_status::JobStatus, scope::Scope},
        window::{resolve_windows, ScopeSettings}
    }
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Mutex
};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Random win/loss sequence, roughly 60% wins.
pub fn generate_outcomes(seed: u64, n: usize) -> Vec<bool> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_bool(0.6)).collect()
}

/// One outcome per element, an hour apart, in the given order.
pub fn outcomes_from_pattern(pattern: &[bool]) -> Vec<ResolvedOutcome> {
    pattern
        .iter()
        .enumerate()
        .map(|(i, won)| ResolvedOutcome {
            entry_id: i as i64 + 1,
            resolved_at: base_time() + Duration::hours(i as i64),
            won: *won
        })
        .collect()
}

/// Stats for users `1..=n`. Window sums never exceed the all-time sum.
pub fn generate_stats(seed: u64, n: i32) -> Vec<ExtractedStats> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    (1..=n)
        .map(|user_id| {
            let all_time_points = rng.random_range(0..20_000);
            let yearly_window_points = rng.random_range(0..=all_time_points);
            let current_window_points = rng.random_range(0..=yearly_window_points);
            let prediction_count = rng.random_range(0..300);
            let prediction_wins = rng.random_range(0..=prediction_count);
            let max = rng.random_range(0..15);

            ExtractedStats {
                user_id,
                all_time_points,
                current_window_points,
                yearly_window_points,
                prediction_count,
                prediction_wins,
                last_prediction_at: Some(base_time() + Duration::days(rng.random_range(0..365))),
                last_resolved_at: Some(base_time() + Duration::days(rng.random_range(0..365))),
                streak: Streak {
                    current: rng.random_range(0..=max),
                    max
                }
            }
        })
        .collect()
}

/// Grouped adjustment sums for users `1..=n + 5`; the last five have no stats from
/// [`generate_stats`] with the same `n`.
pub fn generate_adjustment_sums(seed: u64, n: i32) -> Vec<AdjustmentSum> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
    let mut sums = Vec::new();

    for user_id in 1..=n + 5 {
        for scope in [Scope::Global, Scope::Current, Scope::Yearly] {
            if rng.random_bool(0.3) {
                sums.push(AdjustmentSum {
                    user_id,
                    scope,
                    delta: rng.random_range(-500..=500)
                });
            }
        }
    }

    sums
}

pub fn generate_merged_entries(seed: u64, n: i32) -> Vec<MergedEntry> {
    merge_all(generate_stats(seed, n), &generate_adjustment_sums(seed, n))
}

pub fn merged_entry(user_id: i32, total: i64, seasonal: i64, yearly: i64) -> MergedEntry {
    let stats = ExtractedStats {
        user_id,
        all_time_points: total,
        current_window_points: seasonal,
        yearly_window_points: yearly,
        ..Default::default()
    };

    merge(stats, AdjustmentTotals::default())
}

pub fn reward_payload(user_id: i32, group: &str, tier: i32, scope_year: i32, points: i64) -> RewardPayload {
    RewardPayload {
        user_id,
        group: group.to_string(),
        tier,
        points,
        scope_year
    }
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    jobs: BTreeMap<i64, RewardJob>,
    rewards: HashSet<(i32, String, i32, i32)>,
    adjustments: Vec<(i32, i64)>,
    failing: HashSet<i64>,
    // Claimed jobs whose lease has run out
    expired: HashSet<i64>,
    fail_recording_broken: bool,
    transitions: HashMap<i64, Vec<JobStatus>>
}

impl QueueState {
    fn set_status(&mut self, id: i64, status: JobStatus) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.status = status;
        }
        self.transitions.entry(id).or_default().push(status);
    }
}

/// [`RewardQueue`] over a map, with the same claim/complete/fail semantics as the table-backed
/// queue.
#[derive(Default)]
pub struct InMemoryRewardQueue {
    state: Mutex<QueueState>
}

impl InMemoryRewardQueue {
    pub fn enqueue(&self, payload: RewardPayload) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.jobs.insert(
            id,
            RewardJob {
                id,
                payload,
                status: JobStatus::Pending,
                attempts: 0,
                last_error: None
            }
        );

        id
    }

    /// Every `complete` of this job errors from now on.
    pub fn fail_always(&self, id: i64) {
        self.state.lock().unwrap().failing.insert(id);
    }

    /// Every `fail` errors while set, leaving the job claimed.
    pub fn break_fail_recording(&self, broken: bool) {
        self.state.lock().unwrap().fail_recording_broken = broken;
    }

    /// Expires the lease of every job currently in PROCESSING.
    pub fn expire_leases(&self) {
        let mut state = self.state.lock().unwrap();
        let claimed: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .map(|j| j.id)
            .collect();
        state.expired.extend(claimed);
    }

    pub fn job(&self, id: i64) -> RewardJob {
        self.state.lock().unwrap().jobs[&id].clone()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.state.lock().unwrap().jobs.values().map(|j| j.status).collect()
    }

    /// Status changes of a job after enqueueing, in order.
    pub fn transitions(&self, id: i64) -> Vec<JobStatus> {
        self.state
            .lock()
            .unwrap()
            .transitions
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reward_count(&self, payload: &RewardPayload) -> usize {
        let (user_id, group, tier, year) = payload.idempotency_key();
        let key = (user_id, group.to_string(), tier, year);

        usize::from(self.state.lock().unwrap().rewards.contains(&key))
    }

    pub fn adjustments_for(&self, user_id: i32) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .adjustments
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, delta)| *delta)
            .collect()
    }

    fn claim_now(&self, batch_size: i64, max_attempts: i32) -> Vec<RewardJob> {
        let mut state = self.state.lock().unwrap();

        let expired: Vec<i64> = state.expired.drain().collect();
        for id in expired {
            let attempts = match state.jobs.get_mut(&id) {
                Some(job) if job.status == JobStatus::Processing => {
                    job.attempts += 1;
                    job.last_error = Some(LEASE_EXPIRED_MESSAGE.to_string());
                    job.attempts
                }
                _ => continue
            };
            state.set_status(id, JobStatus::after_failure(attempts, max_attempts));
        }

        let ids: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .take(batch_size.max(0) as usize)
            .map(|j| j.id)
            .collect();

        for id in &ids {
            state.set_status(*id, JobStatus::Processing);
        }

        ids.iter().map(|id| state.jobs[id].clone()).collect()
    }

    fn complete_now(&self, job: &RewardJob) -> Result<RewardOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&job.id) {
            return Err(DbError::InvalidRow(format!("simulated failure for job {}", job.id)));
        }

        let (user_id, group, tier, year) = job.payload.idempotency_key();
        let key = (user_id, group.to_string(), tier, year);

        let outcome = if state.rewards.insert(key) {
            state.adjustments.push((user_id, job.payload.points));
            RewardOutcome::Applied
        } else {
            RewardOutcome::AlreadyApplied
        };
        state.set_status(job.id, JobStatus::Done);

        Ok(outcome)
    }

    fn fail_now(&self, job: &RewardJob, error: &str, max_attempts: i32) -> Result<JobStatus> {
        let mut state = self.state.lock().unwrap();
        if state.fail_recording_broken {
            return Err(DbError::InvalidRow(format!("simulated lost update for job {}", job.id)));
        }

        let attempts = state.jobs.get(&job.id).map(|j| j.attempts + 1).unwrap_or(1);
        let status = JobStatus::after_failure(attempts, max_attempts);

        if let Some(stored) = state.jobs.get_mut(&job.id) {
            stored.attempts = attempts;
            stored.last_error = Some(error.to_string());
        }
        state.set_status(job.id, status);

        Ok(status)
    }
}

#[async_trait]
impl RewardQueue for InMemoryRewardQueue {
    async fn claim(&self, batch_size: i64, max_attempts: i32) -> Result<Vec<RewardJob>> {
        Ok(self.claim_now(batch_size, max_attempts))
    }

    async fn complete(&self, job: &RewardJob) -> Result<RewardOutcome> {
        self.complete_now(job)
    }

    async fn fail(&self, job: &RewardJob, error: &str, max_attempts: i32) -> Result<JobStatus> {
        self.fail_now(job, error, max_attempts)
    }
}

/// Records every invalidation. A failing recorder still records, then errors.
#[derive(Default)]
pub struct RecordingInvalidator {
    keys: Mutex<Vec<String>>,
    prefixes: Mutex<Vec<String>>,
    fail: bool
}

impl RecordingInvalidator {
    pub fn failing() -> Self {
        RecordingInvalidator {
            fail: true,
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.prefixes.lock().unwrap().clone()
    }

    fn result(&self) -> std::result::Result<(), PublisherError> {
        if self.fail {
            Err(PublisherError::NotInitialized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate(&self, key: &str) -> std::result::Result<(), PublisherError> {
        self.keys.lock().unwrap().push(key.to_string());
        self.result()
    }

    async fn invalidate_prefix(&self, prefix: &str) -> std::result::Result<(), PublisherError> {
        self.prefixes.lock().unwrap().push(prefix.to_string());
        self.result()
    }
}

/// Records the user sets it is asked to recalculate. A failing recorder still records, then
/// errors.
#[derive(Default)]
pub struct RecordingRecalculator {
    calls: Mutex<Vec<Vec<i32>>>,
    fail: bool
}

impl RecordingRecalculator {
    pub fn failing() -> Self {
        RecordingRecalculator {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<i32>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recalculator for RecordingRecalculator {
    async fn recalculate_users(&self, users: &[i32]) -> Result<RecalculationReport> {
        self.calls.lock().unwrap().push(users.to_vec());
        if self.fail {
            return Err(DbError::Timeout(std::time::Duration::from_secs(1)));
        }
        let now = Utc::now();

        Ok(RecalculationReport {
            full: false,
            users_written: users.len(),
            snapshot_rows: 0,
            windows: resolve_windows(now, &ScopeSettings::default(), &[]),
            recalculated_at: now,
            elapsed_ms: 0
        })
    }
}
