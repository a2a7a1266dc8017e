pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod media;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use engine::{Engine, RunningEngine};
pub use error::{
    ActionError, ConfigError, MediaQueueError, QueueError, Result, StoreError, WorkerError,
};
pub use executor::{ActionExecutor, ActionHandler, ActionOutcome};
pub use media::{Action, EntityRef, EntityType, Flag, FlagCondition, MediaRecord};
pub use queue::{FailOutcome, Job, JobFilter, JobId, JobQueue, JobState, RetryPolicy};
pub use scheduler::Scheduler;
pub use store::{RecordStore, SqliteRecordStore};
pub use telemetry::init_logging;
pub use worker::{WorkerEvent, WorkerPool, WorkerSettings};
