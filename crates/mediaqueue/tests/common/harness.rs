//! Test harness for isolated test execution.
//!
//! Each `TestHarness` owns a temporary directory holding its SQLite file and
//! an engine whose clock only moves when the test advances it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use tempfile::TempDir;

use mediaqueue::{
    ActionError, ActionOutcome, Config, Database, EntityRef, Engine, FailOutcome, Job,
    ManualClock, MediaRecord, RecordStore, WorkerEvent, WorkerPool,
};

use super::ConfigBuilder;

/// What happened when the harness ran one job by hand.
#[derive(Debug)]
pub struct ProcessedJob {
    pub job: Job,
    pub result: Result<ActionOutcome, ActionError>,
    pub fail_outcome: Option<FailOutcome>,
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub clock: Arc<ManualClock>,
    pub engine: Engine,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new().build())
    }

    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("mediaqueue.db");
        config.database_path = Some(db_path.clone());

        let db = Database::open(&db_path).expect("Failed to open database");
        let clock = Arc::new(ManualClock::default());
        let engine = Engine::with_database(config, db, clock.clone());

        Self {
            temp_dir,
            db_path,
            clock,
            engine,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn advance(&self, by: TimeDelta) {
        self.clock.advance(by);
    }

    pub fn video(&self, file_name: &str) -> MediaRecord {
        self.engine
            .store()
            .create_video(file_name)
            .expect("Failed to create video")
    }

    pub fn book(&self, title: &str) -> MediaRecord {
        self.engine
            .store()
            .create_book(title)
            .expect("Failed to create book")
    }

    /// Current persisted state of a record.
    pub fn reload(&self, entity: EntityRef) -> MediaRecord {
        self.engine
            .store()
            .find(entity, None)
            .expect("Failed to load record")
            .expect("Record missing")
    }

    /// Claims, executes and resolves one job on the calling thread, the way a
    /// pool worker would.
    pub fn process_next(&self, worker_id: &str) -> Option<ProcessedJob> {
        let queue = self.engine.queue();
        let lease = self.engine.config().worker.lease();
        let job = queue.claim_next(worker_id, lease).expect("claim failed")?;

        let result = self.engine.executor().execute(job.entity, job.action);
        let fail_outcome = match &result {
            Ok(_) => {
                queue.complete(job.id, worker_id).expect("complete failed");
                None
            }
            Err(e) => Some(
                queue
                    .fail(job.id, worker_id, &e.to_string())
                    .expect("fail failed"),
            ),
        };

        Some(ProcessedJob {
            job,
            result,
            fail_outcome,
        })
    }

    /// Processes jobs until none is due.
    pub fn drain(&self, worker_id: &str) -> Vec<ProcessedJob> {
        std::iter::from_fn(|| self.process_next(worker_id)).collect()
    }

    /// Collects pool events until `count` job events arrived or `timeout` passed.
    pub fn collect_job_events(
        pool: &WorkerPool,
        count: usize,
        timeout: Duration,
    ) -> Vec<WorkerEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match pool.recv_event_timeout(remaining) {
                Some(event) if event.job_id().is_some() => events.push(event),
                Some(_) => {}
                None => break,
            }
        }
        events
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
