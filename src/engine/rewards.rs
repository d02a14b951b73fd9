use std::{collections::BTreeSet, sync::Arc};

use serde::Serialize;
use tracing::{error, info, warn};

use super::recalculation::Recalculator;
use crate::{
    database::{db_structs::RewardOutcome, error::Result, reward_queue::RewardQueue},
    messaging::{invalidation::invalidate_users, CacheInvalidator},
    model::structures::job_status::JobStatus
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardBatchReport {
    pub claimed: usize,
    pub applied: usize,
    pub already_applied: usize,
    /// Failed attempts that went back to PENDING
    pub retried: usize,
    /// Jobs that reached FAILED in this batch
    pub failed: usize,
    /// Users whose rewards were newly applied, recalculated after the batch
    pub affected_users: Vec<i32>,
    pub recalculation_error: Option<String>
}

/// Drains the reward queue in bounded batches.
pub struct RewardProcessor {
    queue: Arc<dyn RewardQueue>,
    recalculator: Arc<dyn Recalculator>,
    invalidator: Arc<dyn CacheInvalidator>,
    max_attempts: i32
}

impl RewardProcessor {
    pub fn new(
        queue: Arc<dyn RewardQueue>,
        recalculator: Arc<dyn Recalculator>,
        invalidator: Arc<dyn CacheInvalidator>,
        max_attempts: i32
    ) -> Self {
        RewardProcessor {
            queue,
            recalculator,
            invalidator,
            max_attempts: max_attempts.max(1)
        }
    }

    /// Claims up to `limit` jobs and applies each on its own. A failing job never stops the
    /// batch. Afterwards the affected users are recalculated, which also drops their cache
    /// entries.
    pub async fn process_pending(&self, limit: i64) -> Result<RewardBatchReport> {
        let jobs = self.queue.claim(limit.max(0), self.max_attempts).await?;
        let mut report = RewardBatchReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        if jobs.is_empty() {
            return Ok(report);
        }
        info!("Claimed {} reward jobs", jobs.len());

        let mut affected = BTreeSet::new();

        for job in &jobs {
            match self.queue.complete(job).await {
                Ok(RewardOutcome::Applied) => {
                    report.applied += 1;
                    affected.insert(job.payload.user_id);
                }
                Ok(RewardOutcome::AlreadyApplied) => report.already_applied += 1,
                Err(e) => {
                    let message = e.to_string();
                    match self.queue.fail(job, &message, self.max_attempts).await {
                        Ok(JobStatus::Failed) => {
                            report.failed += 1;
                            error!("Reward job {} failed permanently: {}", job.id, message);
                        }
                        Ok(_) => {
                            report.retried += 1;
                            warn!(
                                "Reward job {} failed (attempt {} of {}), will retry: {}",
                                job.id,
                                job.attempts + 1,
                                self.max_attempts,
                                message
                            );
                        }
                        Err(fail_err) => {
                            // The job stays claimed until its lease expires
                            error!("Could not record failure of reward job {}: {}", job.id, fail_err);
                        }
                    }
                }
            }
        }

        report.affected_users = affected.into_iter().collect();

        if !report.affected_users.is_empty() {
            if let Err(e) = self.recalculator.recalculate_users(&report.affected_users).await {
                error!("Recalculation after reward batch failed: {}", e);
                report.recalculation_error = Some(e.to_string());
                // Achievement lists changed even though ratings did not
                invalidate_users(self.invalidator.as_ref(), &report.affected_users).await;
            }
        }

        info!(
            "Reward batch done: {} applied, {} already applied, {} retried, {} failed",
            report.applied, report.already_applied, report.retried, report.failed
        );
        Ok(report)
    }
}
