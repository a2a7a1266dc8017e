use crate::executor::ActionOutcome;
use crate::media::{Action, EntityRef};
use crate::queue::{FailOutcome, JobId};

/// Outcome notifications sent by workers to whoever holds the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Succeeded {
        worker_id: String,
        job_id: JobId,
        entity: EntityRef,
        action: Action,
        outcome: ActionOutcome,
    },
    Failed {
        worker_id: String,
        job_id: JobId,
        entity: EntityRef,
        action: Action,
        error: String,
        outcome: FailOutcome,
    },
    /// The worker loop has exited. `error` is set when it gave up on the
    /// store rather than being shut down.
    Stopped {
        worker_id: String,
        error: Option<String>,
    },
}

impl WorkerEvent {
    pub fn worker_id(&self) -> &str {
        match self {
            WorkerEvent::Succeeded { worker_id, .. }
            | WorkerEvent::Failed { worker_id, .. }
            | WorkerEvent::Stopped { worker_id, .. } => worker_id,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            WorkerEvent::Succeeded { job_id, .. } | WorkerEvent::Failed { job_id, .. } => {
                Some(*job_id)
            }
            WorkerEvent::Stopped { .. } => None,
        }
    }
}
