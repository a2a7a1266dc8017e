//! Media repository: CRUD operations for the `videos` and `books` tables.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{to_millis, Database, DatabaseError};
use crate::media::{EntityRef, EntityType, FlagCondition, MediaRecord};

fn select_sql(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Video => {
            "SELECT id, file_name AS name, encoded, uploaded, NULL AS published FROM videos"
        }
        EntityType::Book => {
            "SELECT id, title AS name, NULL AS encoded, NULL AS uploaded, published FROM books"
        }
    }
}

fn record_from_row(entity_type: EntityType, row: &Row<'_>) -> Result<MediaRecord, rusqlite::Error> {
    // Flag columns are nullable; NULL reads as "not done yet".
    Ok(MediaRecord {
        entity_type,
        id: row.get("id")?,
        name: row.get("name")?,
        encoded: row.get::<_, Option<bool>>("encoded")?.unwrap_or(false),
        uploaded: row.get::<_, Option<bool>>("uploaded")?.unwrap_or(false),
        published: row.get::<_, Option<bool>>("published")?.unwrap_or(false),
    })
}

/// Returns the SQL predicate for `condition`, or `None` when the flag is not
/// persisted for this type (such records always read the flag as false).
fn condition_sql(entity_type: EntityType, condition: &FlagCondition) -> Option<String> {
    if entity_type.flags().contains(&condition.flag) {
        Some(format!("COALESCE({}, 0) = ?", condition.flag.column()))
    } else {
        None
    }
}

/// Inserts a new video with all flags unset.
pub fn insert_video(
    db: &Database,
    file_name: &str,
    now: DateTime<Utc>,
) -> Result<MediaRecord, DatabaseError> {
    let id = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO videos (file_name, encoded, uploaded, created_at, updated_at)
             VALUES (?1, 0, 0, ?2, ?2)",
            params![file_name, to_millis(now)],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    Ok(MediaRecord {
        entity_type: EntityType::Video,
        id,
        name: file_name.to_string(),
        encoded: false,
        uploaded: false,
        published: false,
    })
}

/// Inserts a new book with all flags unset.
pub fn insert_book(
    db: &Database,
    title: &str,
    now: DateTime<Utc>,
) -> Result<MediaRecord, DatabaseError> {
    let id = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO books (title, published, created_at, updated_at) VALUES (?1, 0, ?2, ?2)",
            params![title, to_millis(now)],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    Ok(MediaRecord {
        entity_type: EntityType::Book,
        id,
        name: title.to_string(),
        encoded: false,
        uploaded: false,
        published: false,
    })
}

/// Finds a record by reference, optionally requiring a flag condition.
pub fn find(
    db: &Database,
    entity: EntityRef,
    condition: Option<FlagCondition>,
) -> Result<Option<MediaRecord>, DatabaseError> {
    let entity_type = entity.entity_type;
    let predicate = condition.as_ref().and_then(|c| condition_sql(entity_type, c));

    let record = db.with_conn(|conn| {
        let sql = match &predicate {
            Some(p) => format!("{} WHERE id = ? AND {}", select_sql(entity_type), p),
            None => format!("{} WHERE id = ?", select_sql(entity_type)),
        };
        let mut stmt = conn.prepare(&sql)?;
        let row = match (&predicate, &condition) {
            (Some(_), Some(c)) => stmt
                .query_row(params![entity.id, c.value], |r| record_from_row(entity_type, r))
                .optional()?,
            _ => stmt
                .query_row(params![entity.id], |r| record_from_row(entity_type, r))
                .optional()?,
        };
        Ok(row)
    })?;

    Ok(record.filter(|r| condition.map_or(true, |c| r.matches(&c))))
}

/// Lists records of one type in id order, optionally filtered by a flag condition.
pub fn list(
    db: &Database,
    entity_type: EntityType,
    condition: Option<FlagCondition>,
) -> Result<Vec<MediaRecord>, DatabaseError> {
    let predicate = condition.as_ref().and_then(|c| condition_sql(entity_type, c));

    let rows = db.with_conn(|conn| {
        let sql = match &predicate {
            Some(p) => format!("{} WHERE {} ORDER BY id", select_sql(entity_type), p),
            None => format!("{} ORDER BY id", select_sql(entity_type)),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = match (&predicate, &condition) {
            (Some(_), Some(c)) => stmt
                .query_map(params![c.value], |r| record_from_row(entity_type, r))?
                .collect::<Result<Vec<_>, _>>()?,
            _ => stmt
                .query_map([], |r| record_from_row(entity_type, r))?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    })?;

    Ok(rows
        .into_iter()
        .filter(|r| condition.map_or(true, |c| r.matches(&c)))
        .collect())
}

/// Writes the record's name and persisted flags. Returns false if no row matched.
pub fn update(db: &Database, record: &MediaRecord, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = match record.entity_type {
            EntityType::Video => conn.execute(
                "UPDATE videos SET file_name = ?2, encoded = ?3, uploaded = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    record.id,
                    record.name,
                    record.encoded,
                    record.uploaded,
                    to_millis(now)
                ],
            )?,
            EntityType::Book => conn.execute(
                "UPDATE books SET title = ?2, published = ?3, updated_at = ?4 WHERE id = ?1",
                params![record.id, record.name, record.published, to_millis(now)],
            )?,
        };
        Ok(changed > 0)
    })
}
