use std::path::PathBuf;
use thiserror::Error;

/// Failures of the SQLite layer underneath the queue and record store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory or file could not be created.
    #[error("Cannot prepare database at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An `up` step failed; the migration was not recorded.
    #[error("Applying migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A `down` step failed; the migration stays recorded as applied.
    #[error("Reverting migration v{version} failed: {reason}")]
    Revert { version: u32, reason: String },

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}
