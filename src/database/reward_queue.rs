use std::time::Duration;

use async_trait::async_trait;
use postgres_types::ToSql;
use tokio_postgres::{IsolationLevel, Row};
use tracing::{debug, error, warn};

use super::{
    db::DbClient,
    db_structs::{RewardJob, RewardOutcome, RewardPayload},
    error::{DbError, Result}
};
use crate::model::structures::{job_status::JobStatus, scope::Scope};

/// Durable work queue of reward jobs.
///
/// `claim` must hand each PENDING job to at most one caller and must not block on jobs
/// another worker holds. `complete` is idempotent per [`RewardPayload::idempotency_key`].
///
/// A claim is a lease. A job left in PROCESSING past its lease (a crashed worker, or a
/// failure that could not be recorded) counts as one failed attempt and is put back into
/// play by the next `claim`, or marked FAILED once `max_attempts` is spent.
#[async_trait]
pub trait RewardQueue: Send + Sync {
    /// Recovers expired leases, then moves up to `batch_size` PENDING jobs to PROCESSING
    /// and returns them, oldest first.
    async fn claim(&self, batch_size: i64, max_attempts: i32) -> Result<Vec<RewardJob>>;

    /// Applies a claimed job and marks it DONE.
    async fn complete(&self, job: &RewardJob) -> Result<RewardOutcome>;

    /// Records a failed attempt and returns the status the job moved to.
    async fn fail(&self, job: &RewardJob, error: &str, max_attempts: i32) -> Result<JobStatus>;
}

pub const LEASE_EXPIRED_MESSAGE: &str = "claim lease expired before the job finished";

/// [`RewardQueue`] backed by the `reward_jobs` and `achievement_rewards` tables.
#[derive(Clone)]
pub struct PgRewardQueue {
    db: DbClient,
    timeout: Duration,
    lease: Duration
}

impl PgRewardQueue {
    /// The lease defaults to `timeout`.
    pub fn new(db: DbClient, timeout: Duration) -> Self {
        PgRewardQueue {
            db,
            timeout,
            lease: timeout
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn mark_done(client: &impl tokio_postgres::GenericClient, job_id: i64) -> Result<()> {
        client
            .execute(
                "UPDATE reward_jobs SET status = $2, last_error = NULL, claimed_at = NULL, updated_at = now() \
                 WHERE id = $1",
                &[&job_id, &(JobStatus::Done as i32)]
            )
            .await?;

        Ok(())
    }

    async fn reward_exists(client: &impl tokio_postgres::GenericClient, p: &RewardPayload) -> Result<bool> {
        let existing = client
            .query_opt(
                "SELECT id FROM achievement_rewards \
                 WHERE user_id = $1 AND group_key = $2 AND tier = $3 AND scope_year = $4",
                &[&p.user_id, &p.group, &p.tier, &p.scope_year]
            )
            .await?;

        Ok(existing.is_some())
    }

    async fn apply(&self, job: &RewardJob) -> Result<RewardOutcome> {
        let mut client = self.db.lock().await;
        let tx = DbClient::begin_with(&mut client, self.timeout, IsolationLevel::ReadCommitted, false).await?;
        let p = &job.payload;

        if Self::reward_exists(&tx, p).await? {
            Self::mark_done(&tx, job.id).await?;
            tx.commit().await?;
            debug!("Reward for job {} was already applied", job.id);
            return Ok(RewardOutcome::AlreadyApplied);
        }

        let params: [&(dyn ToSql + Sync); 6] = [&p.user_id, &p.group, &p.tier, &p.scope_year, &p.points, &job.id];
        let inserted = tx
            .query_opt(
                "INSERT INTO achievement_rewards (user_id, group_key, tier, scope_year, points, job_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (user_id, group_key, tier, scope_year) DO NOTHING RETURNING id",
                &params
            )
            .await?;

        // A concurrent worker committed the same reward between our lookup and insert
        if inserted.is_none() {
            Self::mark_done(&tx, job.id).await?;
            tx.commit().await?;
            return Ok(RewardOutcome::AlreadyApplied);
        }

        DbClient::insert_adjustment(&tx, p.user_id, p.points, Scope::Global, &p.adjustment_reason()).await?;
        Self::mark_done(&tx, job.id).await?;
        tx.commit().await?;

        Ok(RewardOutcome::Applied)
    }

    /// Settles a job whose insert lost a race to a concurrent worker. Only an existing
    /// reward row turns the error into [`RewardOutcome::AlreadyApplied`].
    async fn settle_race(&self, job: &RewardJob, cause: DbError) -> Result<RewardOutcome> {
        let client = self.db.lock().await;
        if !Self::reward_exists(&*client, &job.payload).await? {
            return Err(cause);
        }

        warn!("Reward job {} lost an insert race, treating as already applied", job.id);
        Self::mark_done(&*client, job.id).await?;
        Ok(RewardOutcome::AlreadyApplied)
    }

    async fn fail_undecodable(&self, job_id: i64, message: &str) -> Result<()> {
        let client = self.db.lock().await;
        let params: [&(dyn ToSql + Sync); 3] = [&job_id, &(JobStatus::Failed as i32), &message];
        client
            .execute(
                "UPDATE reward_jobs SET status = $2, attempts = attempts + 1, last_error = $3, claimed_at = NULL, \
                 updated_at = now() WHERE id = $1",
                &params
            )
            .await?;

        Ok(())
    }
}

fn job_from_row(row: &Row) -> Result<RewardJob> {
    let id: i64 = row.get("id");
    let status_code: i32 = row.get("status");
    let status = JobStatus::try_from(status_code)
        .map_err(|_| DbError::InvalidRow(format!("reward job {} has unknown status {}", id, status_code)))?;
    let payload: RewardPayload = serde_json::from_value(row.get("payload"))?;

    Ok(RewardJob {
        id,
        payload,
        status,
        attempts: row.get("attempts"),
        last_error: row.get("last_error")
    })
}

#[async_trait]
impl RewardQueue for PgRewardQueue {
    async fn claim(&self, batch_size: i64, max_attempts: i32) -> Result<Vec<RewardJob>> {
        let rows = {
            let mut client = self.db.lock().await;
            let tx = DbClient::begin_with(&mut client, self.timeout, IsolationLevel::ReadCommitted, false).await?;

            let lease_secs = self.lease.as_secs_f64();
            let params: [&(dyn ToSql + Sync); 6] = [
                &lease_secs,
                &max_attempts,
                &(JobStatus::Pending as i32),
                &(JobStatus::Processing as i32),
                &(JobStatus::Failed as i32),
                &LEASE_EXPIRED_MESSAGE
            ];
            let recovered = tx
                .query(
                    "UPDATE reward_jobs SET attempts = attempts + 1, \
                        status = CASE WHEN attempts + 1 >= $2 THEN $5::int4 ELSE $3::int4 END, \
                        last_error = $6, claimed_at = NULL, updated_at = now() \
                     WHERE id IN (SELECT id FROM reward_jobs \
                                  WHERE status = $4 AND claimed_at < now() - make_interval(secs => $1) \
                                  FOR UPDATE SKIP LOCKED) \
                     RETURNING id, status",
                    &params
                )
                .await?;

            for row in &recovered {
                let status = JobStatus::try_from(row.get::<_, i32>("status")).unwrap_or(JobStatus::Failed);
                warn!("Reward job {} outlived its claim lease, now {}", row.get::<_, i64>("id"), status);
            }

            let rows = tx
                .query(
                    "UPDATE reward_jobs SET status = $2, claimed_at = now(), updated_at = now() \
                     WHERE id IN (SELECT id FROM reward_jobs WHERE status = $3 ORDER BY id LIMIT $1 \
                                  FOR UPDATE SKIP LOCKED) \
                     RETURNING id, payload, status, attempts, last_error",
                    &[&batch_size, &(JobStatus::Processing as i32), &(JobStatus::Pending as i32)]
                )
                .await?;
            tx.commit().await?;

            rows
        };

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match job_from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // Retrying cannot fix a malformed payload
                    let id: i64 = row.get("id");
                    match self.fail_undecodable(id, &e.to_string()).await {
                        Ok(()) => error!("Reward job {} is unreadable and was marked FAILED: {}", id, e),
                        // Its lease runs out and a later claim settles it
                        Err(mark_err) => {
                            error!("Reward job {} is unreadable and could not be marked FAILED: {}", id, mark_err)
                        }
                    }
                }
            }
        }

        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn complete(&self, job: &RewardJob) -> Result<RewardOutcome> {
        let result = tokio::time::timeout(self.timeout, self.apply(job))
            .await
            .map_err(|_| DbError::Timeout(self.timeout))?;

        match result {
            Err(e) if e.is_unique_violation() || e.is_serialization_failure() => self.settle_race(job, e).await,
            other => other
        }
    }

    async fn fail(&self, job: &RewardJob, error: &str, max_attempts: i32) -> Result<JobStatus> {
        let mut client = self.db.lock().await;
        let tx = DbClient::begin_with(&mut client, self.timeout, IsolationLevel::ReadCommitted, false).await?;

        let attempts: i32 = tx
            .query_one("SELECT attempts FROM reward_jobs WHERE id = $1 FOR UPDATE", &[&job.id])
            .await?
            .get(0);
        let attempts = attempts + 1;
        let status = JobStatus::after_failure(attempts, max_attempts);

        let params: [&(dyn ToSql + Sync); 4] = [&job.id, &(status as i32), &attempts, &error];
        tx.execute(
            "UPDATE reward_jobs SET status = $2, attempts = $3, last_error = $4, claimed_at = NULL, updated_at = now() \
             WHERE id = $1",
            &params
        )
        .await?;
        tx.commit().await?;

        Ok(status)
    }
}
