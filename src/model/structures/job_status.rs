use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::Display;

/// Reward job states.
///
/// ```text
/// PENDING --claim--> PROCESSING --success--> DONE
/// PROCESSING --failure, attempts < max--> PENDING
/// PROCESSING --failure, attempts == max--> FAILED
/// ```
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum JobStatus {
    #[default]
    Pending = 0,
    Processing = 1,
    Done = 2,
    Failed = 3
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Status a PROCESSING job moves to after its `attempts`-th failure.
    pub fn after_failure(attempts: i32, max_attempts: i32) -> JobStatus {
        if attempts < max_attempts {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        }
    }
}

impl TryFrom<i32> for JobStatus {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::Processing),
            2 => Ok(JobStatus::Done),
            3 => Ok(JobStatus::Failed),
            _ => Err(())
        }
    }
}
