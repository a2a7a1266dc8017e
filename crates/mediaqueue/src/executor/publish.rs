use super::{ActionHandler, ActionOutcome, WorkSimulator};
use crate::error::ActionError;
use crate::media::{Action, MediaRecord};

/// Combines a book's parts for publishing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishHandler;

impl ActionHandler for PublishHandler {
    fn action(&self) -> Action {
        Action::Publish
    }

    fn run(
        &self,
        record: &mut MediaRecord,
        work: &WorkSimulator,
    ) -> Result<ActionOutcome, ActionError> {
        let elapsed = work.run("Combining for publishing", "combining", &record.name);
        record.published = true;
        Ok(ActionOutcome::Performed { elapsed })
    }
}
