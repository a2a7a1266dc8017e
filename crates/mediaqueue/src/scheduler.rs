//! Job admission and queue maintenance.
//!
//! [`Scheduler`] is the only way jobs enter the queue: immediately, at a given
//! time, or after the per-action default deferral. It also sweeps records whose
//! flag is still unset into jobs, and runs a background thread that reclaims
//! expired leases on an interval or on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::clock;
use crate::config::{DeferralsConfig, SchedulerConfig};
use crate::error::{QueueError, WorkerError};
use crate::media::{Action, EntityRef, EntityType, FlagCondition};
use crate::queue::{JobId, JobQueue, ReclaimReport};

pub struct Scheduler {
    queue: Arc<JobQueue>,
    deferrals: DeferralsConfig,
    reclaim_interval: Duration,
    shutdown: Arc<AtomicBool>,
    trigger_tx: broadcast::Sender<()>,
    passes: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(queue: Arc<JobQueue>, config: &SchedulerConfig) -> Self {
        let (trigger_tx, _) = broadcast::channel(16);
        Self {
            queue,
            deferrals: config.deferrals.clone(),
            reclaim_interval: config.reclaim_interval(),
            shutdown: Arc::new(AtomicBool::new(false)),
            trigger_tx,
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Schedules `action` on `entity` at `at`, or now when `None`.
    pub fn schedule(
        &self,
        entity: EntityRef,
        action: Action,
        at: Option<DateTime<Utc>>,
    ) -> Result<JobId, QueueError> {
        let not_before = at.unwrap_or_else(|| self.queue.now());
        self.queue.enqueue(entity, action, not_before)
    }

    pub fn schedule_in(
        &self,
        entity: EntityRef,
        action: Action,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let not_before = clock::after(self.queue.now(), delay);
        self.queue.enqueue(entity, action, not_before)
    }

    /// Schedules with the configured deferral for `action`; uploads wait five
    /// minutes by default.
    pub fn schedule_default(&self, entity: EntityRef, action: Action) -> Result<JobId, QueueError> {
        self.schedule_in(entity, action, self.deferrals.for_action(action))
    }

    /// Enqueues `action` for every record of `entity_type` whose flag is unset
    /// and that has no pending or claimed job for it. Returns the number of
    /// jobs added.
    ///
    /// The open-job check and the insert are separate statements, so two
    /// concurrent sweeps may both enqueue a record. Duplicates are harmless:
    /// the second delivery finds the flag set and skips.
    pub fn enqueue_unprocessed(
        &self,
        entity_type: EntityType,
        action: Action,
    ) -> Result<usize, QueueError> {
        if !action.applies_to(entity_type) {
            return Err(QueueError::Validation(format!(
                "action '{}' does not apply to {} records",
                action, entity_type
            )));
        }

        let records = self
            .queue
            .store()
            .find_all(entity_type, Some(FlagCondition::unset(action.flag())))?;

        let mut enqueued = 0;
        for record in records {
            let entity = record.entity_ref();
            if self.queue.has_open_job(entity, action)? {
                continue;
            }
            self.schedule_default(entity, action)?;
            enqueued += 1;
        }

        if enqueued > 0 {
            log::info!("Enqueued {} {} jobs for unprocessed {} records", enqueued, action, entity_type);
        }
        Ok(enqueued)
    }

    /// Runs one reclaim pass on the calling thread.
    pub fn run_maintenance_pass(&self) -> Result<ReclaimReport, QueueError> {
        maintenance_pass(&self.queue, &self.passes)
    }

    /// Number of maintenance passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Starts the maintenance loop in a background thread.
    pub fn start(&self) -> Result<JoinHandle<()>, WorkerError> {
        let queue = Arc::clone(&self.queue);
        let shutdown = Arc::clone(&self.shutdown);
        let passes = Arc::clone(&self.passes);
        let interval = self.reclaim_interval;
        let mut trigger_rx = self.trigger_tx.subscribe();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| WorkerError::Runtime(e.to_string()))?;

        std::thread::Builder::new()
            .name("mediaqueue-maintenance".to_string())
            .spawn(move || {
                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        let scheduler_alive = tokio::select! {
                            _ = interval_timer.tick() => true,
                            received = trigger_rx.recv() => match received {
                                Ok(()) | Err(RecvError::Lagged(_)) => {
                                    log::debug!("Maintenance pass triggered");
                                    true
                                }
                                Err(RecvError::Closed) => false,
                            },
                        };

                        // Closed means the owning scheduler was dropped.
                        if !scheduler_alive || shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        if let Err(e) = maintenance_pass(&queue, &passes) {
                            log::error!("Reclaiming stale jobs failed: {}", e);
                        }
                    }
                });
                log::debug!("Maintenance loop stopped");
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
    }

    /// Requests an immediate maintenance pass from a running loop.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.send(());
    }

    /// Signals the maintenance loop to stop and wakes it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.trigger_tx.send(());
    }
}

fn maintenance_pass(queue: &JobQueue, passes: &AtomicU64) -> Result<ReclaimReport, QueueError> {
    let report = queue.reclaim_stale();
    passes.fetch_add(1, Ordering::AcqRel);
    report
}
