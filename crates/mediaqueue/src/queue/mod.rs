//! Durable job queue.
//!
//! The queue owns every [`Job`] row. Records are referenced by
//! [`EntityRef`] and resolved through a [`RecordStore`] only to validate
//! enqueues.

mod job;
mod retry;

pub use job::{FailOutcome, Job, JobFilter, JobId, JobState, NewJob, QueueStats, ReclaimReport};
pub use retry::{BackoffStrategy, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::clock::{self, Clock, SystemClock};
use crate::db::{job_repo, Database};
use crate::error::QueueError;
use crate::media::{Action, EntityRef};
use crate::store::RecordStore;

pub struct JobQueue {
    db: Database,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl JobQueue {
    pub fn new(db: Database, store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self::with_clock(db, store, retry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Database,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            store,
            clock,
            retry,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Adds a pending job that becomes claimable at `not_before`.
    ///
    /// Rejected with `Validation` when the action does not apply to the
    /// entity type or the entity does not exist.
    pub fn enqueue(
        &self,
        entity: EntityRef,
        action: Action,
        not_before: DateTime<Utc>,
    ) -> Result<JobId, QueueError> {
        if !action.applies_to(entity.entity_type) {
            return Err(QueueError::Validation(format!(
                "action '{}' does not apply to {} records",
                action, entity.entity_type
            )));
        }
        if !self.store.exists(entity)? {
            return Err(QueueError::Validation(format!("{} does not exist", entity)));
        }

        let job = NewJob {
            entity,
            action,
            not_before,
            attempts: 0,
            max_attempts: self.retry.max_attempts,
            retry_of: None,
        };
        let id = job_repo::insert(&self.db, &job, self.clock.now())?;
        info!(
            "Enqueued job {} ({} {}) not before {}",
            id,
            action,
            entity,
            not_before.to_rfc3339()
        );
        Ok(id)
    }

    /// Claims the oldest due pending job, leasing it to `worker_id` for `lease`.
    pub fn claim_next(&self, worker_id: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now();
        let job = job_repo::claim_next(&self.db, worker_id, now, clock::after(now, lease))?;
        if let Some(job) = &job {
            debug!(
                "Worker {} claimed job {} ({} {}), attempt {}",
                worker_id,
                job.id,
                job.action,
                job.entity,
                job.attempts + 1
            );
        }
        Ok(job)
    }

    /// Marks a job held by `worker_id` as succeeded.
    ///
    /// A claim whose lease ran out can still be completed until a reclaim
    /// sweep takes it back.
    pub fn complete(&self, job_id: JobId, worker_id: &str) -> Result<(), QueueError> {
        if job_repo::mark_succeeded(&self.db, job_id, worker_id, self.clock.now())? {
            debug!("Job {} succeeded", job_id);
            return Ok(());
        }
        Err(self.not_held(job_id, worker_id)?)
    }

    /// Marks a job held by `worker_id` as failed and enqueues a retry if the
    /// job has attempts left.
    pub fn fail(
        &self,
        job_id: JobId,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, QueueError> {
        let job = self.get(job_id)?;
        if job.state != JobState::Claimed || job.claimed_by.as_deref() != Some(worker_id) {
            return Err(self.not_held(job_id, worker_id)?);
        }

        let now = self.clock.now();
        let failures = job.attempts + 1;
        let retry = (failures < job.max_attempts).then(|| NewJob {
            entity: job.entity,
            action: job.action,
            not_before: clock::after(now, self.retry.backoff(failures)),
            attempts: failures,
            max_attempts: job.max_attempts,
            retry_of: Some(job_id),
        });

        let Some(retry_id) =
            job_repo::mark_failed(&self.db, job_id, worker_id, error, now, retry.as_ref())?
        else {
            return Err(self.not_held(job_id, worker_id)?);
        };

        match retry_id {
            Some(next) => {
                warn!(
                    "Job {} failed (attempt {}/{}): {}; retrying as job {}",
                    job_id, failures, job.max_attempts, error, next
                );
                Ok(FailOutcome::Retried(next))
            }
            None => {
                warn!(
                    "Job {} failed permanently after {} attempts: {}",
                    job_id, failures, error
                );
                Ok(FailOutcome::Exhausted)
            }
        }
    }

    /// Returns claims whose lease has expired to pending, or fails them when
    /// their attempts are spent.
    pub fn reclaim_stale(&self) -> Result<ReclaimReport, QueueError> {
        let report = job_repo::reclaim_expired(&self.db, self.clock.now())?;
        if report.total() > 0 {
            info!(
                "Reclaimed {} stale jobs ({} requeued, {} exhausted)",
                report.total(),
                report.requeued,
                report.exhausted
            );
        }
        Ok(report)
    }

    /// Cancels a job that no worker has claimed yet.
    pub fn cancel(&self, job_id: JobId) -> Result<(), QueueError> {
        if job_repo::cancel(&self.db, job_id, self.clock.now())? {
            info!("Cancelled job {}", job_id);
            return Ok(());
        }
        let job = self.get(job_id)?;
        Err(QueueError::State {
            job_id,
            reason: format!("cannot cancel a {} job", job.state),
        })
    }

    /// Extends a live lease held by `worker_id` to `now + lease`.
    pub fn renew_lease(
        &self,
        job_id: JobId,
        worker_id: &str,
        lease: Duration,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        if job_repo::renew_lease(&self.db, job_id, worker_id, now, clock::after(now, lease))? {
            return Ok(());
        }
        Err(self.not_held(job_id, worker_id)?)
    }

    pub fn get(&self, job_id: JobId) -> Result<Job, QueueError> {
        job_repo::find_by_id(&self.db, job_id)?.ok_or(QueueError::JobNotFound(job_id))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, QueueError> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(job_repo::count_by_state(&self.db)?)
    }

    /// Whether a pending or claimed job exists for `action` on `entity`.
    pub fn has_open_job(&self, entity: EntityRef, action: Action) -> Result<bool, QueueError> {
        Ok(job_repo::has_open(&self.db, entity, action)?)
    }

    /// Builds the error for a transition attempted by a worker that does not
    /// hold the job.
    fn not_held(&self, job_id: JobId, worker_id: &str) -> Result<QueueError, QueueError> {
        let job = self.get(job_id)?;
        let reason = match (job.state, job.claimed_by.as_deref()) {
            (JobState::Claimed, Some(holder)) if holder != worker_id => {
                format!("claimed by {}, not {}", holder, worker_id)
            }
            (JobState::Claimed, _) => format!("lease held by {} has expired", worker_id),
            (state, _) => format!("job is {}, not claimed", state),
        };
        Ok(QueueError::State { job_id, reason })
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("db", &self.db)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::media::EntityType;
    use crate::store::SqliteRecordStore;
    use chrono::TimeDelta;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(30);

    struct Fixture {
        queue: JobQueue,
        store: Arc<SqliteRecordStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(retry: RetryPolicy) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(SqliteRecordStore::with_clock(db.clone(), clock.clone()));
        let queue = JobQueue::with_clock(db, store.clone(), retry, clock.clone());
        Fixture {
            queue,
            store,
            clock,
        }
    }

    #[test]
    fn test_enqueue_validates_applicability() {
        let f = fixture(RetryPolicy::default());
        let book = f.store.create_book("Dune").unwrap();

        let err = f
            .queue
            .enqueue(book.entity_ref(), Action::Encode, f.queue.now())
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(f
            .queue
            .enqueue(book.entity_ref(), Action::Publish, f.queue.now())
            .is_ok());
    }

    #[test]
    fn test_enqueue_rejects_missing_entity() {
        let f = fixture(RetryPolicy::default());
        let err = f
            .queue
            .enqueue(EntityRef::video(7), Action::Encode, f.queue.now())
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(msg) if msg.contains("video#7")));
        assert_eq!(f.queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn test_enqueue_copies_max_attempts() {
        let f = fixture(RetryPolicy::fixed(4, Duration::ZERO));
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();

        let job = f.queue.get(id).unwrap();
        assert_eq!(job.max_attempts, 4);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_future_job_not_claimed_early() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let at = f.clock.now() + TimeDelta::minutes(5);
        let id = f.queue.enqueue(video.entity_ref(), Action::Upload, at).unwrap();

        assert!(f.queue.claim_next("w", LEASE).unwrap().is_none());
        f.clock.advance(TimeDelta::minutes(5) - TimeDelta::milliseconds(1));
        assert!(f.queue.claim_next("w", LEASE).unwrap().is_none());
        f.clock.advance(TimeDelta::milliseconds(1));
        assert_eq!(f.queue.claim_next("w", LEASE).unwrap().unwrap().id, id);
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let f = fixture(RetryPolicy::default());
        let now = f.queue.now();
        let mut expected = HashSet::new();
        for i in 0..40 {
            let video = f.store.create_video(&format!("{}.wma", i)).unwrap();
            expected.insert(f.queue.enqueue(video.entity_ref(), Action::Encode, now).unwrap());
        }

        let queue = Arc::new(f.queue);
        let claimed = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|w| {
                let queue = Arc::clone(&queue);
                let claimed = Arc::clone(&claimed);
                thread::spawn(move || {
                    let worker = format!("w{}", w);
                    while let Some(job) = queue.claim_next(&worker, LEASE).unwrap() {
                        claimed.lock().unwrap().push(job.id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock().unwrap();
        let unique: HashSet<JobId> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), 40);
        assert_eq!(unique, expected);
    }

    #[test]
    fn test_complete_requires_holder() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();

        let err = f.queue.complete(id, "w1").unwrap_err();
        assert!(matches!(err, QueueError::State { .. }));

        f.queue.claim_next("w1", LEASE).unwrap().unwrap();
        let err = f.queue.complete(id, "w2").unwrap_err();
        assert!(matches!(err, QueueError::State { reason, .. } if reason.contains("w1")));

        f.queue.complete(id, "w1").unwrap();
        let job = f.queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.finished_at.is_some());

        assert!(matches!(
            f.queue.complete(JobId(999), "w1").unwrap_err(),
            QueueError::JobNotFound(JobId(999))
        ));
    }

    #[test]
    fn test_fail_enqueues_retry_with_backoff() {
        let f = fixture(RetryPolicy::fixed(3, Duration::from_secs(10)));
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();
        f.queue.claim_next("w", LEASE).unwrap().unwrap();

        let FailOutcome::Retried(retry_id) = f.queue.fail(id, "w", "disk full").unwrap() else {
            panic!("expected a retry");
        };

        let failed = f.queue.get(id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("disk full"));

        let retry = f.queue.get(retry_id).unwrap();
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.retry_of, Some(id));
        assert_eq!(retry.not_before, f.clock.now() + TimeDelta::seconds(10));

        assert!(f.queue.claim_next("w", LEASE).unwrap().is_none());
        f.clock.advance(TimeDelta::seconds(10));
        assert_eq!(f.queue.claim_next("w", LEASE).unwrap().unwrap().id, retry_id);
    }

    #[test]
    fn test_fail_exhausts_after_max_attempts() {
        let f = fixture(RetryPolicy::fixed(3, Duration::ZERO));
        let video = f.store.create_video("a.wma").unwrap();
        f.queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();

        let mut outcomes = Vec::new();
        while let Some(job) = f.queue.claim_next("w", LEASE).unwrap() {
            outcomes.push(f.queue.fail(job.id, "w", "boom").unwrap());
        }

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.last(), Some(&FailOutcome::Exhausted));
        let stats = f.queue.stats().unwrap();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.pending, 0);
        assert!(!f.queue.has_open_job(video.entity_ref(), Action::Encode).unwrap());
    }

    #[test]
    fn test_fail_by_non_holder_is_rejected() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();
        f.queue.claim_next("w1", LEASE).unwrap().unwrap();

        assert!(matches!(
            f.queue.fail(id, "w2", "boom").unwrap_err(),
            QueueError::State { .. }
        ));
        assert_eq!(f.queue.get(id).unwrap().state, JobState::Claimed);
    }

    #[test]
    fn test_reclaim_increments_attempts_once() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();
        f.queue.claim_next("w", LEASE).unwrap().unwrap();

        assert_eq!(f.queue.reclaim_stale().unwrap().total(), 0);
        f.clock.advance(TimeDelta::seconds(31));
        assert_eq!(f.queue.reclaim_stale().unwrap().requeued, 1);
        assert_eq!(f.queue.reclaim_stale().unwrap().total(), 0);

        let job = f.queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);

        // The worker that lost its lease can no longer resolve the job.
        assert!(f.queue.complete(id, "w").is_err());
    }

    #[test]
    fn test_renew_lease_keeps_claim() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let id = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();
        f.queue.claim_next("w", LEASE).unwrap().unwrap();

        f.clock.advance(TimeDelta::seconds(20));
        f.queue.renew_lease(id, "w", LEASE).unwrap();
        f.clock.advance(TimeDelta::seconds(20));
        assert_eq!(f.queue.reclaim_stale().unwrap().total(), 0);
        assert!(f.queue.renew_lease(id, "intruder", LEASE).is_err());

        f.clock.advance(TimeDelta::seconds(60));
        assert!(matches!(
            f.queue.renew_lease(id, "w", LEASE).unwrap_err(),
            QueueError::State { reason, .. } if reason.contains("expired")
        ));
    }

    #[test]
    fn test_cancel_pending_only() {
        let f = fixture(RetryPolicy::default());
        let video = f.store.create_video("a.wma").unwrap();
        let later = f
            .queue
            .enqueue(video.entity_ref(), Action::Upload, f.clock.now() + TimeDelta::hours(1))
            .unwrap();
        let now = f
            .queue
            .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
            .unwrap();
        f.queue.claim_next("w", LEASE).unwrap().unwrap();

        f.queue.cancel(later).unwrap();
        assert_eq!(f.queue.get(later).unwrap().state, JobState::Cancelled);
        assert!(matches!(
            f.queue.cancel(now).unwrap_err(),
            QueueError::State { .. }
        ));
        assert!(matches!(
            f.queue.cancel(JobId(404)).unwrap_err(),
            QueueError::JobNotFound(_)
        ));
    }

    #[test]
    fn test_list_by_state() {
        let f = fixture(RetryPolicy::default());
        for name in ["a.wma", "b.wma", "c.mp4"] {
            let video = f.store.create_video(name).unwrap();
            f.queue
                .enqueue(video.entity_ref(), Action::Encode, f.queue.now())
                .unwrap();
        }
        f.queue.claim_next("w", LEASE).unwrap().unwrap();

        let pending = f
            .queue
            .list(&JobFilter {
                state: Some(JobState::Pending),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .all(|j| j.entity.entity_type == EntityType::Video));
    }
}
