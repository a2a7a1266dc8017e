//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Every migration carries a reverse step so the
//! schema can be rolled back with [`revert_to`]. Column migrations
//! (ALTER TABLE ADD/DROP COLUMN) are handled conditionally to support
//! idempotent execution.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
    down: &'static str,
    /// Whether this migration needs conditional handling
    /// (e.g. ADD COLUMN that may already exist).
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN on the way up, DROP COLUMN on the way down.
    /// Each direction is skipped when the column is already in the target state.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_videos_table",
        up: include_str!("sql/001_create_videos.up.sql"),
        down: include_str!("sql/001_create_videos.down.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_books_table",
        up: include_str!("sql/002_create_books.up.sql"),
        down: include_str!("sql/002_create_books.down.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "add_uploaded_to_videos",
        up: include_str!("sql/003_add_uploaded_to_videos.up.sql"),
        down: include_str!("sql/003_add_uploaded_to_videos.down.sql"),
        kind: MigrationKind::AddColumn {
            table: "videos",
            column: "uploaded",
        },
    },
    Migration {
        version: 4,
        description: "create_jobs_table",
        up: include_str!("sql/004_create_jobs.up.sql"),
        down: include_str!("sql/004_create_jobs.down.sql"),
        kind: MigrationKind::Standard,
    },
];

/// Highest version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn ensure_tracking_table(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

/// Returns the highest applied migration version (0 for a fresh database).
pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    ensure_tracking_table(conn)?;
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        let tx = conn.unchecked_transaction()?;
        if should_run {
            tx.execute_batch(migration.up)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (condition not met)",
                migration.version
            );
        }

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Reverts applied migrations newer than `target`, newest first.
pub fn revert_to(conn: &Connection, target: u32) -> Result<(), DatabaseError> {
    let current_version = current_version(conn)?;

    for migration in MIGRATIONS.iter().rev() {
        if migration.version > current_version || migration.version <= target {
            continue;
        }

        log::info!(
            "Reverting migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => column_exists(conn, table, column)?,
        };

        let tx = conn.unchecked_transaction()?;
        if should_run {
            tx.execute_batch(migration.down)
                .map_err(|e| DatabaseError::Revert {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        }

        tx.execute(
            "DELETE FROM _migrations WHERE version = ?1",
            rusqlite::params![migration.version],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
pub(crate) fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool, DatabaseError> {
    // Validate identifier: only alphanumeric and underscores allowed.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::InvalidIdentifier(table.to_string()));
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}
