//! Record store: how the queue and the executor see media records.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::db::{media_repo, Database};
use crate::error::StoreError;
use crate::media::{EntityRef, EntityType, FlagCondition, MediaRecord};

/// Lookup and persistence of media records.
pub trait RecordStore: Send + Sync {
    /// Finds one record, optionally only if `condition` holds for it.
    fn find(
        &self,
        entity: EntityRef,
        condition: Option<FlagCondition>,
    ) -> Result<Option<MediaRecord>, StoreError>;

    /// All records of a type in id order, optionally filtered.
    fn find_all(
        &self,
        entity_type: EntityType,
        condition: Option<FlagCondition>,
    ) -> Result<Vec<MediaRecord>, StoreError>;

    /// Persists the record's flags. `NotFound` if the row is gone.
    fn save(&self, record: &MediaRecord) -> Result<(), StoreError>;

    fn exists(&self, entity: EntityRef) -> Result<bool, StoreError> {
        Ok(self.find(entity, None)?.is_some())
    }
}

/// [`RecordStore`] backed by the `videos` and `books` tables.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn create_video(&self, file_name: &str) -> Result<MediaRecord, StoreError> {
        let record = media_repo::insert_video(&self.db, file_name, self.clock.now())?;
        log::debug!("Created video {} ({})", record.id, file_name);
        Ok(record)
    }

    pub fn create_book(&self, title: &str) -> Result<MediaRecord, StoreError> {
        let record = media_repo::insert_book(&self.db, title, self.clock.now())?;
        log::debug!("Created book {} ({})", record.id, title);
        Ok(record)
    }
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl RecordStore for SqliteRecordStore {
    fn find(
        &self,
        entity: EntityRef,
        condition: Option<FlagCondition>,
    ) -> Result<Option<MediaRecord>, StoreError> {
        Ok(media_repo::find(&self.db, entity, condition)?)
    }

    fn find_all(
        &self,
        entity_type: EntityType,
        condition: Option<FlagCondition>,
    ) -> Result<Vec<MediaRecord>, StoreError> {
        Ok(media_repo::list(&self.db, entity_type, condition)?)
    }

    fn save(&self, record: &MediaRecord) -> Result<(), StoreError> {
        if media_repo::update(&self.db, record, self.clock.now())? {
            Ok(())
        } else {
            Err(StoreError::NotFound(record.entity_ref()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Flag;

    fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_and_find() {
        let store = store();
        let video = store.create_video("movie.wma").unwrap();
        let book = store.create_book("Dune").unwrap();

        assert_eq!(store.find(video.entity_ref(), None).unwrap(), Some(video.clone()));
        assert_eq!(store.find(book.entity_ref(), None).unwrap(), Some(book));
        assert!(store.exists(video.entity_ref()).unwrap());
        assert!(!store.exists(EntityRef::video(99)).unwrap());
    }

    #[test]
    fn test_save_persists_flag() {
        let store = store();
        let mut video = store.create_video("movie.wma").unwrap();
        video.set_flag(Flag::Encoded, true);
        store.save(&video).unwrap();

        let unencoded = FlagCondition::unset(Flag::Encoded);
        assert!(store.find(video.entity_ref(), Some(unencoded)).unwrap().is_none());
        assert!(store
            .find_all(EntityType::Video, Some(unencoded))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_save_missing_record() {
        let store = store();
        let mut ghost = store.create_book("Ghost").unwrap();
        ghost.id = 42;
        let err = store.save(&ghost).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(e) if e == EntityRef::book(42)));
    }
}
