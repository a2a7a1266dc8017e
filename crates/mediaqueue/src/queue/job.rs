//! Job records owned by the queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::media::{Action, EntityRef};

/// Unique job identifier, assigned at enqueue time in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its `not_before` time and a free worker.
    Pending,
    /// Held by exactly one worker until its lease expires.
    Claimed,
    Succeeded,
    Failed,
    /// Removed before any worker claimed it.
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Claimed => "claimed",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "claimed" => Ok(JobState::Claimed),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(QueueError::Validation(format!("unknown job state '{}'", other))),
        }
    }
}

/// One scheduled invocation of an action on a media record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub entity: EntityRef,
    pub action: Action,
    /// The job is not eligible for claim before this time.
    pub not_before: DateTime<Utc>,
    pub state: JobState,
    /// Failed or expired deliveries before this one.
    pub attempts: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// The failed job this one retries.
    pub retry_of: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether `worker_id` holds a claim whose lease has not run out at `now`.
    pub fn is_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.state == JobState::Claimed
            && self.claimed_by.as_deref() == Some(worker_id)
            && self.lease_expires_at.map_or(false, |expiry| expiry > now)
    }
}

/// Insert parameters for a new pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub entity: EntityRef,
    pub action: Action,
    pub not_before: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub retry_of: Option<JobId>,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub action: Option<Action>,
    pub entity: Option<EntityRef>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Job counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.succeeded + self.failed + self.cancelled
    }
}

/// Result of recording a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// A fresh pending job was enqueued to retry the action.
    Retried(JobId),
    /// The attempt budget is spent; the job stays terminally failed.
    Exhausted,
}

/// Result of a stale-claim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Claims reverted to pending.
    pub requeued: usize,
    /// Claims that ran out of attempts and were failed instead.
    pub exhausted: usize,
}

impl ReclaimReport {
    pub fn total(&self) -> usize {
        self.requeued + self.exhausted
    }
}
