//! Media records and the actions that can be run against them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Kind of persisted media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Video,
    Book,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Video, EntityType::Book];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Video => "video",
            EntityType::Book => "book",
        }
    }

    /// Table holding records of this type.
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Video => "videos",
            EntityType::Book => "books",
        }
    }

    /// Column holding the display name (`file_name` for videos, `title` for books).
    pub fn name_column(&self) -> &'static str {
        match self {
            EntityType::Video => "file_name",
            EntityType::Book => "title",
        }
    }

    /// Processing flags persisted for this type.
    pub fn flags(&self) -> &'static [Flag] {
        match self {
            EntityType::Video => &[Flag::Encoded, Flag::Uploaded],
            EntityType::Book => &[Flag::Published],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(EntityType::Video),
            "book" => Ok(EntityType::Book),
            other => Err(QueueError::Validation(format!(
                "unknown entity type '{}'",
                other
            ))),
        }
    }
}

/// Reference to a media record. Jobs hold references, never the record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: i64) -> Self {
        Self { entity_type, id }
    }

    pub fn video(id: i64) -> Self {
        Self::new(EntityType::Video, id)
    }

    pub fn book(id: i64) -> Self {
        Self::new(EntityType::Book, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Boolean processing flag on a media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Encoded,
    Uploaded,
    Published,
}

impl Flag {
    pub fn column(&self) -> &'static str {
        match self {
            Flag::Encoded => "encoded",
            Flag::Uploaded => "uploaded",
            Flag::Published => "published",
        }
    }
}

/// A closed set of actions a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Encode,
    Upload,
    Publish,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Encode, Action::Upload, Action::Publish];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Encode => "encode",
            Action::Upload => "upload",
            Action::Publish => "publish",
        }
    }

    /// The flag this action sets once it succeeds.
    pub fn flag(&self) -> Flag {
        match self {
            Action::Encode => Flag::Encoded,
            Action::Upload => Flag::Uploaded,
            Action::Publish => Flag::Published,
        }
    }

    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        entity_type.flags().contains(&self.flag())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encode" => Ok(Action::Encode),
            "upload" => Ok(Action::Upload),
            "publish" => Ok(Action::Publish),
            other => Err(QueueError::Validation(format!("unknown action '{}'", other))),
        }
    }
}

/// Equality predicate on a single flag, e.g. `encoded = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagCondition {
    pub flag: Flag,
    pub value: bool,
}

impl FlagCondition {
    pub fn unset(flag: Flag) -> Self {
        Self { flag, value: false }
    }

    pub fn set(flag: Flag) -> Self {
        Self { flag, value: true }
    }
}

/// A video or book row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub entity_type: EntityType,
    pub id: i64,
    /// `file_name` for videos, `title` for books.
    pub name: String,
    pub encoded: bool,
    pub uploaded: bool,
    pub published: bool,
}

impl MediaRecord {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.id)
    }

    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::Encoded => self.encoded,
            Flag::Uploaded => self.uploaded,
            Flag::Published => self.published,
        }
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Encoded => self.encoded = value,
            Flag::Uploaded => self.uploaded = value,
            Flag::Published => self.published = value,
        }
    }

    pub fn matches(&self, condition: &FlagCondition) -> bool {
        self.flag(condition.flag) == condition.value
    }

    /// Lowercased extension including the leading dot (`".wma"`), if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
    }
}
