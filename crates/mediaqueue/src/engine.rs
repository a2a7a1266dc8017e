//! Wires a [`Config`] into a running queue: database, record store, job queue,
//! executor, scheduler and worker pool.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{Database, DatabaseError};
use crate::error::{ConfigError, Result, WorkerError};
use crate::executor::ActionExecutor;
use crate::queue::JobQueue;
use crate::scheduler::Scheduler;
use crate::store::SqliteRecordStore;
use crate::worker::{WorkerEvent, WorkerPool, WorkerSettings};

pub struct Engine {
    config: Config,
    store: Arc<SqliteRecordStore>,
    queue: Arc<JobQueue>,
    executor: Arc<ActionExecutor>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// Opens the configured database file, running pending migrations.
    pub fn open(config: Config) -> Result<Self> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "No database_path configured and no home directory found".to_string(),
            })?;
        let db = Database::open(&path)?;
        Ok(Self::with_database(config, db, Arc::new(SystemClock)))
    }

    pub fn in_memory(config: Config) -> std::result::Result<Self, DatabaseError> {
        Ok(Self::with_database(
            config,
            Database::open_in_memory()?,
            Arc::new(SystemClock),
        ))
    }

    pub fn with_database(config: Config, db: Database, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(SqliteRecordStore::with_clock(db.clone(), Arc::clone(&clock)));
        let queue = Arc::new(JobQueue::with_clock(
            db,
            store.clone(),
            config.retry.policy(),
            clock,
        ));
        let executor = Arc::new(ActionExecutor::new(store.clone(), &config.actions));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&queue), &config.scheduler));
        Self {
            config,
            store,
            queue,
            executor,
            scheduler,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteRecordStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Starts the maintenance loop and `config.worker_count` workers.
    pub fn start(&self) -> std::result::Result<RunningEngine, WorkerError> {
        let maintenance = self.scheduler.start()?;
        let pool = match WorkerPool::start(
            Arc::clone(&self.queue),
            Arc::clone(&self.executor),
            self.config.worker_count,
            WorkerSettings::from(&self.config.worker),
        ) {
            Ok(pool) => pool,
            Err(e) => {
                self.scheduler.stop();
                let _ = maintenance.join();
                return Err(e);
            }
        };

        Ok(RunningEngine {
            pool,
            maintenance,
            scheduler: Arc::clone(&self.scheduler),
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("queue", &self.queue)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Handle to the background threads of a started [`Engine`].
pub struct RunningEngine {
    pool: WorkerPool,
    maintenance: JoinHandle<()>,
    scheduler: Arc<Scheduler>,
}

impl RunningEngine {
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn recv_event_timeout(&self, timeout: std::time::Duration) -> Option<WorkerEvent> {
        self.pool.recv_event_timeout(timeout)
    }

    /// Stops the workers and the maintenance loop and joins all threads.
    pub fn stop(self) {
        self.scheduler.stop();
        self.pool.wait();
        if self.maintenance.join().is_err() {
            log::error!("Maintenance thread panicked");
        }
    }
}
