//! Action executor: runs one action against one media record.
//!
//! Handlers are registered per [`Action`]. The executor loads the record only
//! while its flag is still unset, so a repeated delivery of a finished action
//! is a no-op, and persists the record after the handler marks it done.

mod encode;
mod publish;
mod upload;
mod work;

pub use encode::EncodeHandler;
pub use publish::PublishHandler;
pub use upload::UploadHandler;
pub use work::WorkSimulator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::ActionsConfig;
use crate::error::ActionError;
use crate::media::{Action, EntityRef, FlagCondition, MediaRecord};
use crate::store::RecordStore;

/// What running an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Simulated work ran for `elapsed` and the flag was set.
    Performed { elapsed: Duration },
    /// The flag was set without doing any work.
    PassedThrough,
    /// The flag was already set; nothing changed.
    Skipped,
}

impl ActionOutcome {
    pub fn changed_record(&self) -> bool {
        !matches!(self, ActionOutcome::Skipped)
    }
}

/// One action's work. Handlers only see records whose flag is still unset and
/// must set it before returning `Ok`.
pub trait ActionHandler: Send + Sync {
    fn action(&self) -> Action;

    fn run(
        &self,
        record: &mut MediaRecord,
        work: &WorkSimulator,
    ) -> Result<ActionOutcome, ActionError>;
}

pub struct ActionExecutor {
    store: Arc<dyn RecordStore>,
    work: WorkSimulator,
    handlers: HashMap<Action, Arc<dyn ActionHandler>>,
}

impl ActionExecutor {
    /// An executor without handlers.
    pub fn empty(store: Arc<dyn RecordStore>, work: WorkSimulator) -> Self {
        Self {
            store,
            work,
            handlers: HashMap::new(),
        }
    }

    /// An executor with the built-in encode, upload and publish handlers.
    pub fn new(store: Arc<dyn RecordStore>, config: &ActionsConfig) -> Self {
        let mut executor = Self::empty(
            store,
            WorkSimulator::new(Duration::from_millis(config.max_jitter_ms)),
        );
        executor.register(Arc::new(EncodeHandler::new(&config.encodable_extensions)));
        executor.register(Arc::new(UploadHandler));
        executor.register(Arc::new(PublishHandler));
        executor
    }

    /// Registers a handler, replacing any previous one for the same action.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let action = handler.action();
        debug!("Registered handler for action '{}'", action);
        self.handlers.insert(action, handler);
    }

    pub fn has_handler(&self, action: Action) -> bool {
        self.handlers.contains_key(&action)
    }

    pub fn work(&self) -> &WorkSimulator {
        &self.work
    }

    /// Runs `action` against `entity` unless it has already been done.
    pub fn execute(&self, entity: EntityRef, action: Action) -> Result<ActionOutcome, ActionError> {
        let span = tracing::info_span!("action", action = %action, entity = %entity);
        let _enter = span.enter();

        if !action.applies_to(entity.entity_type) {
            return Err(ActionError::NotApplicable {
                action,
                entity_type: entity.entity_type,
            });
        }
        let handler = self
            .handlers
            .get(&action)
            .ok_or(ActionError::NoHandler(action))?;

        let flag = action.flag();
        let Some(mut record) = self.store.find(entity, Some(FlagCondition::unset(flag)))? else {
            return if self.store.exists(entity)? {
                debug!("{} already has {} set, skipping", entity, flag.column());
                Ok(ActionOutcome::Skipped)
            } else {
                Err(ActionError::EntityNotFound(entity))
            };
        };

        let outcome = handler.run(&mut record, &self.work)?;
        if !record.flag(flag) {
            return Err(ActionError::Processing(format!(
                "handler for '{}' returned without setting {}",
                action,
                flag.column()
            )));
        }
        self.store.save(&record)?;

        info!("Finished {} on {} ({:?})", action, entity, outcome);
        Ok(outcome)
    }
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<&str> = self.handlers.keys().map(|a| a.as_str()).collect();
        actions.sort_unstable();
        f.debug_struct("ActionExecutor")
            .field("work", &self.work)
            .field("actions", &actions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::media::{EntityType, Flag};
    use crate::store::SqliteRecordStore;

    fn setup() -> (Arc<SqliteRecordStore>, ActionExecutor) {
        let store = Arc::new(SqliteRecordStore::new(Database::open_in_memory().unwrap()));
        let config = ActionsConfig {
            max_jitter_ms: 0,
            ..Default::default()
        };
        let executor = ActionExecutor::new(store.clone(), &config);
        (store, executor)
    }

    struct Forgetful;

    impl ActionHandler for Forgetful {
        fn action(&self) -> Action {
            Action::Upload
        }

        fn run(&self, _: &mut MediaRecord, _: &WorkSimulator) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::PassedThrough)
        }
    }

    #[test]
    fn test_encode_wma_sets_flag() {
        let (store, executor) = setup();
        let video = store.create_video("movie.wma").unwrap();

        let outcome = executor.execute(video.entity_ref(), Action::Encode).unwrap();
        assert!(matches!(outcome, ActionOutcome::Performed { .. }));
        assert!(store.find(video.entity_ref(), None).unwrap().unwrap().encoded);
    }

    #[test]
    fn test_rerun_is_skipped() {
        let (store, executor) = setup();
        let video = store.create_video("movie.wma").unwrap();
        executor.execute(video.entity_ref(), Action::Encode).unwrap();
        let before = store.find(video.entity_ref(), None).unwrap();

        let outcome = executor.execute(video.entity_ref(), Action::Encode).unwrap();
        assert_eq!(outcome, ActionOutcome::Skipped);
        assert!(!outcome.changed_record());
        assert_eq!(store.find(video.entity_ref(), None).unwrap(), before);
    }

    #[test]
    fn test_publish_book() {
        let (store, executor) = setup();
        let book = store.create_book("Dune").unwrap();
        executor.execute(book.entity_ref(), Action::Publish).unwrap();

        let saved = store.find(book.entity_ref(), None).unwrap().unwrap();
        assert!(saved.flag(Flag::Published));
    }

    #[test]
    fn test_missing_entity() {
        let (_, executor) = setup();
        let err = executor.execute(EntityRef::video(5), Action::Upload).unwrap_err();
        assert!(matches!(err, ActionError::EntityNotFound(e) if e == EntityRef::video(5)));
    }

    #[test]
    fn test_inapplicable_action() {
        let (store, executor) = setup();
        let book = store.create_book("Dune").unwrap();
        let err = executor.execute(book.entity_ref(), Action::Encode).unwrap_err();
        assert!(matches!(
            err,
            ActionError::NotApplicable {
                action: Action::Encode,
                entity_type: EntityType::Book
            }
        ));
    }

    #[test]
    fn test_missing_handler() {
        let store = Arc::new(SqliteRecordStore::new(Database::open_in_memory().unwrap()));
        let executor = ActionExecutor::empty(store.clone(), WorkSimulator::instant());
        let video = store.create_video("movie.wma").unwrap();
        assert!(matches!(
            executor.execute(video.entity_ref(), Action::Encode).unwrap_err(),
            ActionError::NoHandler(Action::Encode)
        ));
    }

    #[test]
    fn test_handler_must_set_flag() {
        let (store, mut executor) = setup();
        executor.register(Arc::new(Forgetful));
        let video = store.create_video("movie.wma").unwrap();

        let err = executor.execute(video.entity_ref(), Action::Upload).unwrap_err();
        assert!(matches!(err, ActionError::Processing(_)));
        assert!(!store.find(video.entity_ref(), None).unwrap().unwrap().uploaded);
    }
}
