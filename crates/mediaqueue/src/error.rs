use std::path::PathBuf;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::media::{Action, EntityRef, EntityType};
use crate::queue::JobId;

#[derive(Error, Debug)]
pub enum MediaQueueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid environment override '{name}': {reason}")]
    InvalidOverride { name: String, reason: String },
}

/// Errors from job queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Bad enqueue input: unknown action, inapplicable action, unresolved entity.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// Illegal state transition, e.g. completing a job held by another worker.
    #[error("Illegal transition for job {job_id}: {reason}")]
    State { job_id: JobId, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),
}

impl QueueError {
    pub fn is_persistence(&self) -> bool {
        matches!(self, QueueError::Persistence(_))
    }
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity) => QueueError::EntityNotFound(entity),
            StoreError::Persistence(e) => QueueError::Persistence(e),
        }
    }
}

/// Errors from the record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(EntityRef),

    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Errors raised while running an action against a record.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    #[error("Action '{action}' does not apply to {entity_type} records")]
    NotApplicable {
        action: Action,
        entity_type: EntityType,
    },

    #[error("No handler registered for action '{0}'")]
    NoHandler(Action),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker '{worker_id}' gave up after {attempts} store attempts: {source}")]
    Infrastructure {
        worker_id: String,
        attempts: u32,
        #[source]
        source: QueueError,
    },

    #[error("Maintenance runtime failed: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, MediaQueueError>;
