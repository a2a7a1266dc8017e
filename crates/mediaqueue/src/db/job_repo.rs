//! Job repository: row operations for the `jobs` table.
//!
//! Every state transition is a single guarded `UPDATE` so that concurrent
//! callers (threads or processes sharing the file) race on the row itself.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{optional_time_column, time_column, to_millis, to_millis_ceil, Database, DatabaseError};
use crate::media::{Action, EntityRef, EntityType};
use crate::queue::{Job, JobFilter, JobId, JobState, NewJob, QueueStats, ReclaimReport};

const LEASE_EXPIRED: &str = "lease expired";

fn parse_column<T>(row: &Row<'_>, column: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let entity_type: EntityType = parse_column(row, "entity_type")?;
    Ok(Job {
        id: JobId(row.get("id")?),
        entity: EntityRef::new(entity_type, row.get("entity_id")?),
        action: parse_column::<Action>(row, "action")?,
        not_before: time_column(row, "not_before")?,
        state: parse_column::<JobState>(row, "state")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        claimed_by: row.get("claimed_by")?,
        claimed_at: optional_time_column(row, "claimed_at")?,
        lease_expires_at: optional_time_column(row, "lease_expires_at")?,
        last_error: row.get("last_error")?,
        retry_of: row.get::<_, Option<i64>>("retry_of")?.map(JobId),
        created_at: time_column(row, "created_at")?,
        updated_at: time_column(row, "updated_at")?,
        finished_at: optional_time_column(row, "finished_at")?,
    })
}

fn insert_with(conn: &Connection, job: &NewJob, now: DateTime<Utc>) -> Result<JobId, DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (entity_type, entity_id, action, not_before, state, attempts,
         max_attempts, retry_of, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?8)",
        params![
            job.entity.entity_type.as_str(),
            job.entity.id,
            job.action.as_str(),
            to_millis_ceil(job.not_before),
            job.attempts,
            job.max_attempts,
            job.retry_of.map(|id| id.0),
            to_millis(now),
        ],
    )?;
    Ok(JobId(conn.last_insert_rowid()))
}

/// Inserts a new pending job.
pub fn insert(db: &Database, job: &NewJob, now: DateTime<Utc>) -> Result<JobId, DatabaseError> {
    db.with_conn(|conn| insert_with(conn, job, now))
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: JobId) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id.0], job_from_row)
            .optional()?;
        Ok(job)
    })
}

/// Claims the oldest due pending job for `worker_id` in one statement.
///
/// Order is `not_before` then `id`. The outer `state = 'pending'` guard makes
/// the update a compare-and-swap: a caller that loses the race gets no row.
pub fn claim_next(
    db: &Database,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_expires_at: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "UPDATE jobs
                 SET state = 'claimed', claimed_by = ?1, claimed_at = ?2,
                     lease_expires_at = ?3, updated_at = ?2
                 WHERE id = (
                     SELECT id FROM jobs
                     WHERE state = 'pending' AND not_before <= ?2
                     ORDER BY not_before, id
                     LIMIT 1
                 ) AND state = 'pending'
                 RETURNING *",
                params![worker_id, to_millis(now), to_millis(lease_expires_at)],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Moves a job held by `worker_id` to succeeded. Returns false if not held.
pub fn mark_succeeded(
    db: &Database,
    id: JobId,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs
             SET state = 'succeeded', lease_expires_at = NULL, finished_at = ?3, updated_at = ?3
             WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2",
            params![id.0, worker_id, to_millis(now)],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a job held by `worker_id` to failed and, in the same transaction,
/// inserts `retry` if given.
///
/// Returns `None` if the job was not held by the caller (nothing changes),
/// otherwise the id of the inserted retry, if any.
pub fn mark_failed(
    db: &Database,
    id: JobId,
    worker_id: &str,
    error: &str,
    now: DateTime<Utc>,
    retry: Option<&NewJob>,
) -> Result<Option<Option<JobId>>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE jobs
             SET state = 'failed', last_error = ?3, lease_expires_at = NULL,
                 finished_at = ?4, updated_at = ?4
             WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2",
            params![id.0, worker_id, error, to_millis(now)],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let retry_id = match retry {
            Some(job) => Some(insert_with(&tx, job, now)?),
            None => None,
        };
        tx.commit()?;
        Ok(Some(retry_id))
    })
}

/// Reverts claims whose lease ran out at `now`.
///
/// Each reclaimed job gets `attempts + 1`. Jobs whose attempts reach
/// `max_attempts` are failed with "lease expired"; the rest return to pending.
pub fn reclaim_expired(db: &Database, now: DateTime<Utc>) -> Result<ReclaimReport, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let now = to_millis(now);

        let exhausted = tx.execute(
            "UPDATE jobs
             SET state = 'failed', attempts = attempts + 1, last_error = ?2,
                 claimed_by = NULL, claimed_at = NULL, lease_expires_at = NULL,
                 finished_at = ?1, updated_at = ?1
             WHERE state = 'claimed' AND lease_expires_at <= ?1
               AND attempts + 1 >= max_attempts",
            params![now, LEASE_EXPIRED],
        )?;

        let requeued = tx.execute(
            "UPDATE jobs
             SET state = 'pending', attempts = attempts + 1, last_error = ?2,
                 claimed_by = NULL, claimed_at = NULL, lease_expires_at = NULL,
                 updated_at = ?1
             WHERE state = 'claimed' AND lease_expires_at <= ?1",
            params![now, LEASE_EXPIRED],
        )?;

        tx.commit()?;
        Ok(ReclaimReport { requeued, exhausted })
    })
}

/// Extends a live lease held by `worker_id`. Returns false if not held or already expired.
pub fn renew_lease(
    db: &Database,
    id: JobId,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_expires_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ?4, updated_at = ?3
             WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2 AND lease_expires_at > ?3",
            params![id.0, worker_id, to_millis(now), to_millis(lease_expires_at)],
        )?;
        Ok(changed > 0)
    })
}

/// Cancels a job that is still pending. Returns false otherwise.
pub fn cancel(db: &Database, id: JobId, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'cancelled', finished_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state = 'pending'",
            params![id.0, to_millis(now)],
        )?;
        Ok(changed > 0)
    })
}

/// Whether a pending or claimed job exists for this entity and action.
pub fn has_open(db: &Database, entity: EntityRef, action: Action) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM jobs
                 WHERE entity_type = ?1 AND entity_id = ?2 AND action = ?3
                   AND state IN ('pending', 'claimed')
             )",
            params![entity.entity_type.as_str(), entity.id, action.as_str()],
            |r| r.get(0),
        )?;
        Ok(exists)
    })
}

/// Queries jobs with filters, ordered by id.
pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push(format!("state = ?{}", param_values.len() + 1));
            param_values.push(Box::new(state.as_str()));
        }
        if let Some(action) = filter.action {
            conditions.push(format!("action = ?{}", param_values.len() + 1));
            param_values.push(Box::new(action.as_str()));
        }
        if let Some(entity) = filter.entity {
            conditions.push(format!("entity_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(entity.entity_type.as_str()));
            conditions.push(format!("entity_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(entity.id));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Counts jobs per state.
pub fn count_by_state(db: &Database) -> Result<QueueStats, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = QueueStats::default();
        for (state, count) in counts {
            match state.as_str() {
                "pending" => stats.pending = count,
                "claimed" => stats.claimed = count,
                "succeeded" => stats.succeeded = count,
                "failed" => stats.failed = count,
                "cancelled" => stats.cancelled = count,
                other => log::warn!("Ignoring jobs in unknown state '{}'", other),
            }
        }
        Ok(stats)
    })
}
