use super::{ActionHandler, ActionOutcome, WorkSimulator};
use crate::error::ActionError;
use crate::media::{Action, MediaRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadHandler;

impl ActionHandler for UploadHandler {
    fn action(&self) -> Action {
        Action::Upload
    }

    fn run(
        &self,
        record: &mut MediaRecord,
        work: &WorkSimulator,
    ) -> Result<ActionOutcome, ActionError> {
        let elapsed = work.run("Uploading", "uploading", &record.name);
        record.uploaded = true;
        Ok(ActionOutcome::Performed { elapsed })
    }
}
