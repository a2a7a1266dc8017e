use log::debug;

use super::{ActionHandler, ActionOutcome, WorkSimulator};
use crate::error::ActionError;
use crate::media::{Action, MediaRecord};

/// Encodes videos whose extension is in the encodable set. Anything else is
/// already in a usable format and is only marked encoded.
#[derive(Debug, Clone)]
pub struct EncodeHandler {
    encodable_extensions: Vec<String>,
}

impl EncodeHandler {
    /// Extensions are compared case-insensitively; a leading dot is optional.
    pub fn new(encodable_extensions: &[String]) -> Self {
        let encodable_extensions = encodable_extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_ascii_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();
        Self {
            encodable_extensions,
        }
    }

    pub fn needs_encoding(&self, record: &MediaRecord) -> bool {
        record
            .extension()
            .is_some_and(|ext| self.encodable_extensions.contains(&ext))
    }
}

impl Default for EncodeHandler {
    fn default() -> Self {
        Self::new(&[".wma".to_string()])
    }
}

impl ActionHandler for EncodeHandler {
    fn action(&self) -> Action {
        Action::Encode
    }

    fn run(
        &self,
        record: &mut MediaRecord,
        work: &WorkSimulator,
    ) -> Result<ActionOutcome, ActionError> {
        if !self.needs_encoding(record) {
            debug!("{} needs no encoding, marking encoded", record.name);
            record.encoded = true;
            return Ok(ActionOutcome::PassedThrough);
        }

        let elapsed = work.run("Encoding", "encoding", &record.name);
        record.encoded = true;
        Ok(ActionOutcome::Performed { elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::EntityType;

    fn video(name: &str) -> MediaRecord {
        MediaRecord {
            entity_type: EntityType::Video,
            id: 1,
            name: name.to_string(),
            encoded: false,
            uploaded: false,
            published: false,
        }
    }

    #[test]
    fn test_wma_is_encoded() {
        let handler = EncodeHandler::default();
        let mut record = video("movie.wma");
        let outcome = handler.run(&mut record, &WorkSimulator::instant()).unwrap();
        assert!(matches!(outcome, ActionOutcome::Performed { .. }));
        assert!(record.encoded);
    }

    #[test]
    fn test_other_formats_pass_through() {
        let handler = EncodeHandler::default();
        for name in ["movie.mp4", "movie", "wma"] {
            let mut record = video(name);
            let outcome = handler.run(&mut record, &WorkSimulator::default()).unwrap();
            assert_eq!(outcome, ActionOutcome::PassedThrough, "{}", name);
            assert!(record.encoded);
        }
    }

    #[test]
    fn test_extension_match_ignores_case_and_dot() {
        let handler = EncodeHandler::new(&["WMA".to_string(), ".avi".to_string()]);
        assert!(handler.needs_encoding(&video("MOVIE.WMA")));
        assert!(handler.needs_encoding(&video("clip.Avi")));
        assert!(!handler.needs_encoding(&video("clip.mkv")));
    }
}
