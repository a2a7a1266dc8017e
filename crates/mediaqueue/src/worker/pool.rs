use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{QueueError, WorkerError};
use crate::executor::ActionExecutor;
use crate::queue::{Job, JobQueue, RetryPolicy};
use crate::worker::event::WorkerEvent;

/// Per-worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub lease: Duration,
    pub store_retry: RetryPolicy,
    pub event_capacity: usize,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            lease: config.lease(),
            store_retry: config.store_retry(),
            event_capacity: config.event_capacity,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// Fixed set of worker threads, each independently claiming and running jobs.
pub struct WorkerPool {
    pool_id: String,
    workers: Vec<(String, JoinHandle<()>)>,
    shutdown: Arc<AtomicBool>,
    /// Dropped on shutdown so idle workers wake immediately.
    wake_tx: Mutex<Option<Sender<()>>>,
    event_receiver: Receiver<WorkerEvent>,
    alive: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn start(
        queue: Arc<JobQueue>,
        executor: Arc<ActionExecutor>,
        worker_count: usize,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let pool_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let (wake_tx, wake_rx) = bounded::<()>(0);
        let (event_sender, event_receiver) = bounded::<WorkerEvent>(settings.event_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicUsize::new(0));

        let mut pool = Self {
            pool_id,
            workers: Vec::with_capacity(worker_count),
            shutdown,
            wake_tx: Mutex::new(Some(wake_tx)),
            event_receiver,
            alive,
        };

        for index in 0..worker_count {
            let worker_id = format!("{}-{}", pool.pool_id, index);
            let worker = Worker {
                id: worker_id.clone(),
                queue: Arc::clone(&queue),
                executor: Arc::clone(&executor),
                settings: settings.clone(),
                shutdown: Arc::clone(&pool.shutdown),
                wake: wake_rx.clone(),
                events: event_sender.clone(),
            };
            let alive = AliveGuard::enter(Arc::clone(&pool.alive));

            let spawned = thread::Builder::new()
                .name(format!("mediaqueue-worker-{}", worker_id))
                .spawn(move || {
                    let _alive = alive;
                    worker.run();
                });

            match spawned {
                Ok(handle) => pool.workers.push((worker_id, handle)),
                Err(e) => {
                    pool.shutdown();
                    pool.join_all();
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers in pool {}", worker_count, pool.pool_id);
        Ok(pool)
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn worker_ids(&self) -> Vec<&str> {
        self.workers.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Workers whose loop has not exited yet.
    pub fn alive_workers(&self) -> usize {
        self.alive.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.event_receiver
    }

    pub fn try_recv_event(&self) -> Option<WorkerEvent> {
        self.event_receiver.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Asks every worker to stop after its current job.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down worker pool {}...", self.pool_id);
        match self.wake_tx.lock() {
            Ok(mut wake) => drop(wake.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shuts down and joins every worker thread.
    pub fn wait(mut self) {
        self.shutdown();
        self.join_all();
        info!("All workers in pool {} have stopped", self.pool_id);
    }

    fn join_all(&mut self) {
        for (worker_id, handle) in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                error!("Worker {} panicked: {:?}", worker_id, e);
            } else {
                debug!("Worker {} finished", worker_id);
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.pool_id)
            .field("workers", &self.workers.len())
            .field("alive", &self.alive_workers())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Dropping a pool stops its workers without joining them.
impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts a worker as alive until its thread ends, including by panic.
struct AliveGuard(Arc<AtomicUsize>);

impl AliveGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Step {
    Idle,
    Worked,
}

struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    executor: Arc<ActionExecutor>,
    settings: WorkerSettings,
    shutdown: Arc<AtomicBool>,
    wake: Receiver<()>,
    events: Sender<WorkerEvent>,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        let error = loop {
            if self.shutdown.load(Ordering::Acquire) {
                debug!("Worker {} received shutdown signal", self.id);
                break None;
            }

            match self.step() {
                Ok(Step::Worked) => continue,
                Ok(Step::Idle) => match self.wake.recv_timeout(self.settings.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Worker {} woken for shutdown", self.id);
                        break None;
                    }
                },
                Err(e) => {
                    error!("Worker {} stopping: {}", self.id, e);
                    break Some(e.to_string());
                }
            }
        };

        self.report(WorkerEvent::Stopped {
            worker_id: self.id.clone(),
            error,
        });
        debug!("Worker {} stopped", self.id);
    }

    /// Claims and resolves at most one job.
    fn step(&self) -> Result<Step, WorkerError> {
        let claimed = self.with_store_retry(|| self.queue.claim_next(&self.id, self.settings.lease));
        match claimed {
            Ok(Some(job)) => {
                self.process(job)?;
                Ok(Step::Worked)
            }
            Ok(None) => Ok(Step::Idle),
            Err(e) => Err(self.infrastructure(e)),
        }
    }

    fn process(&self, job: Job) -> Result<(), WorkerError> {
        debug!(
            "Worker {} running job {} ({} {}), attempt {}/{}",
            self.id,
            job.id,
            job.action,
            job.entity,
            job.attempts + 1,
            job.max_attempts
        );

        match self.executor.execute(job.entity, job.action) {
            Ok(outcome) => {
                match self.with_store_retry(|| self.queue.complete(job.id, &self.id)) {
                    Ok(()) => self.report(WorkerEvent::Succeeded {
                        worker_id: self.id.clone(),
                        job_id: job.id,
                        entity: job.entity,
                        action: job.action,
                        outcome,
                    }),
                    Err(e) if e.is_persistence() => return Err(self.infrastructure(e)),
                    // Lease lost to a reclaim; the next delivery will skip.
                    Err(e) => warn!("Worker {} could not complete job {}: {}", self.id, job.id, e),
                }
            }
            Err(action_error) => {
                let message = action_error.to_string();
                match self.with_store_retry(|| self.queue.fail(job.id, &self.id, &message)) {
                    Ok(outcome) => self.report(WorkerEvent::Failed {
                        worker_id: self.id.clone(),
                        job_id: job.id,
                        entity: job.entity,
                        action: job.action,
                        error: message,
                        outcome,
                    }),
                    Err(e) if e.is_persistence() => return Err(self.infrastructure(e)),
                    Err(e) => warn!("Worker {} could not fail job {}: {}", self.id, job.id, e),
                }
            }
        }
        Ok(())
    }

    /// Retries `op` with backoff while it fails with a persistence error.
    fn with_store_retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let policy = &self.settings.store_retry;
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_persistence() && policy.should_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "Worker {} store call failed (attempt {}/{}), retrying in {:?}: {}",
                        self.id, attempt, policy.max_attempts, delay, e
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn infrastructure(&self, source: QueueError) -> WorkerError {
        WorkerError::Infrastructure {
            worker_id: self.id.clone(),
            attempts: self.settings.store_retry.max_attempts,
            source,
        }
    }

    fn report(&self, event: WorkerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Worker {} event channel full, dropping {:?}", self.id, event);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Worker {} event receiver gone", self.id);
            }
        }
    }
}
