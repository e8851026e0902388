//! Entry domain model.
//!
//! # Responsibility
//! - Define the journal record moved between buckets by the migration engine.
//! - Validate presence rules that the engine relies on before acting.
//!
//! # Invariants
//! - `id` is stable and never nil.
//! - `has_migrated` is one-shot: once true the entry is never forwarded or
//!   promoted again.
//! - `original_date`, once set, is carried unchanged by every forward.
//! - Only archive copies carry `archived = true`, and they always name the
//!   entry they were copied from.

use crate::model::collection::CollectionId;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of an entry.
pub type EntryId = Uuid;

/// Bullet type of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Task,
    Event,
    Note,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
            Self::Note => "note",
        }
    }
}

/// Task lifecycle state. Meaningful only for `EntryKind::Task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Open and actionable.
    Pending,
    Completed,
    /// Legacy marker for a task the user migrated by hand.
    Migrated,
    /// Legacy marker for a task the user pushed to a later date by hand.
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Kind of a reflective entry that never takes part in task forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialEntryType {
    Review,
    Outlook,
}

/// Review/outlook payload attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialEntry {
    pub kind: SpecialEntryType,
    /// First day of the month the review/outlook is about.
    pub target_month: Option<NaiveDateTime>,
    pub is_draft: bool,
}

/// Journal/task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub content: String,
    /// Set for tasks only.
    pub status: Option<TaskStatus>,
    pub priority: Priority,
    /// Day the entry lives on in the daily log.
    pub date: NaiveDateTime,
    /// Due day of a future entry.
    pub scheduled_date: Option<NaiveDateTime>,
    pub is_future_entry: bool,
    /// One-shot retirement flag set by forwarding and promotion.
    pub has_migrated: bool,
    /// First day this logical task ever existed on.
    pub original_date: Option<NaiveDateTime>,
    /// Lowercase, deduplicated tag names.
    pub tags: Vec<String>,
    pub collection_id: Option<CollectionId>,
    pub special: Option<SpecialEntry>,
    /// True only for permanent month-archive copies.
    pub archived: bool,
    /// Source entry of an archive copy.
    pub archived_from: Option<EntryId>,
    pub created_at: NaiveDateTime,
}

/// Presence/shape violations that make one record unusable for migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValidationError {
    NilId,
    /// Persisted identity could not be decoded.
    InvalidId(String),
    MissingDate(EntryId),
    MissingTaskStatus(EntryId),
    UnexpectedTaskStatus { id: EntryId, kind: EntryKind },
    ScheduledDateOnDailyEntry(EntryId),
    MissingArchiveSource(EntryId),
    /// Persisted column could not be decoded into a typed field.
    InvalidField {
        id: EntryId,
        column: &'static str,
        value: String,
    },
}

impl Display for EntryValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "entry id must not be nil"),
            Self::InvalidId(value) => write!(f, "entry id `{value}` is not a valid uuid"),
            Self::MissingDate(id) => write!(f, "entry {id} has no date"),
            Self::MissingTaskStatus(id) => write!(f, "task {id} has no status"),
            Self::UnexpectedTaskStatus { id, kind } => {
                write!(f, "{} entry {id} must not carry a task status", kind.as_str())
            }
            Self::ScheduledDateOnDailyEntry(id) => {
                write!(f, "entry {id} has a scheduled date but is not a future entry")
            }
            Self::MissingArchiveSource(id) => {
                write!(f, "archive copy {id} does not reference its source entry")
            }
            Self::InvalidField { id, column, value } => {
                write!(f, "entry {id} has invalid `{column}` value `{value}`")
            }
        }
    }
}

impl Error for EntryValidationError {}

impl Entry {
    /// Creates an entry with a generated id on the given day.
    ///
    /// Tasks start as `TaskStatus::Pending`; other kinds carry no status.
    pub fn new(kind: EntryKind, content: impl Into<String>, date: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            status: (kind == EntryKind::Task).then_some(TaskStatus::Pending),
            priority: Priority::None,
            date,
            scheduled_date: None,
            is_future_entry: false,
            has_migrated: false,
            original_date: None,
            tags: Vec::new(),
            collection_id: None,
            special: None,
            archived: false,
            archived_from: None,
            created_at: Local::now().naive_local(),
        }
    }

    /// Shorthand for a pending task.
    pub fn task(content: impl Into<String>, date: NaiveDateTime) -> Self {
        Self::new(EntryKind::Task, content, date)
    }

    /// Creates an entry parked in the Future Log until `scheduled_date`.
    pub fn future(
        kind: EntryKind,
        content: impl Into<String>,
        date: NaiveDateTime,
        scheduled_date: Option<NaiveDateTime>,
    ) -> Self {
        let mut entry = Self::new(kind, content, date);
        entry.is_future_entry = true;
        entry.scheduled_date = scheduled_date;
        entry
    }

    pub fn is_task(&self) -> bool {
        self.kind == EntryKind::Task
    }

    pub fn is_pending_task(&self) -> bool {
        self.is_task() && self.status == Some(TaskStatus::Pending)
    }

    /// Date the logical task first appeared on.
    pub fn age_anchor(&self) -> NaiveDateTime {
        self.original_date.unwrap_or(self.date)
    }

    /// Checks presence rules the migration engine depends on.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.id.is_nil() {
            return Err(EntryValidationError::NilId);
        }
        match (self.kind, self.status) {
            (EntryKind::Task, None) => {
                return Err(EntryValidationError::MissingTaskStatus(self.id));
            }
            (EntryKind::Event | EntryKind::Note, Some(_)) => {
                return Err(EntryValidationError::UnexpectedTaskStatus {
                    id: self.id,
                    kind: self.kind,
                });
            }
            _ => {}
        }
        if !self.is_future_entry && self.scheduled_date.is_some() {
            return Err(EntryValidationError::ScheduledDateOnDailyEntry(self.id));
        }
        if self.archived && self.archived_from.is_none() {
            return Err(EntryValidationError::MissingArchiveSource(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Entry, EntryKind, EntryValidationError, TaskStatus};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn day(d: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn task_defaults_to_pending_and_other_kinds_have_no_status() {
        assert_eq!(Entry::task("a", day(1)).status, Some(TaskStatus::Pending));
        assert_eq!(Entry::new(EntryKind::Note, "b", day(1)).status, None);
        assert!(Entry::new(EntryKind::Event, "c", day(1)).validate().is_ok());
    }

    #[test]
    fn validate_rejects_nil_id_and_status_mismatch() {
        let mut entry = Entry::task("a", day(1));
        entry.id = Uuid::nil();
        assert_eq!(entry.validate(), Err(EntryValidationError::NilId));

        let mut note = Entry::new(EntryKind::Note, "b", day(1));
        note.status = Some(TaskStatus::Completed);
        assert!(matches!(
            note.validate(),
            Err(EntryValidationError::UnexpectedTaskStatus { .. })
        ));
    }

    #[test]
    fn validate_rejects_scheduled_date_on_daily_entry() {
        let mut entry = Entry::task("a", day(1));
        entry.scheduled_date = Some(day(3));
        assert_eq!(
            entry.validate(),
            Err(EntryValidationError::ScheduledDateOnDailyEntry(entry.id))
        );
    }

    #[test]
    fn age_anchor_prefers_original_date() {
        let mut entry = Entry::task("a", day(5));
        assert_eq!(entry.age_anchor(), day(5));
        entry.original_date = Some(day(1));
        assert_eq!(entry.age_anchor(), day(1));
    }
}
