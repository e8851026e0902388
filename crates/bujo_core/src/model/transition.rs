//! Pure placement transitions applied by the migration engine.
//!
//! # Responsibility
//! - Turn one stored entry into its retired form plus its successor.
//! - Own the forward-marker rules so no caller prefixes content directly.
//!
//! # Invariants
//! - A transition never changes the retired entry except `has_migrated`.
//! - Successors always get a fresh id.
//! - Content carries at most one forward marker.
//! - Forwarding keeps `original_date` pointing at the first occurrence.

use crate::model::calendar::start_of_day;
use crate::model::collection::{Collection, CollectionId};
use crate::model::entry::{Entry, TaskStatus};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// Prefix marking a task carried over from a prior day.
pub const FORWARD_MARKER: &str = "→ ";

static LEADING_MARKERS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:→\s*)+").expect("valid forward marker regex"));

/// Result of an append-only placement change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Input entry with `has_migrated = true`.
    pub retired: Entry,
    /// New entry that takes over the placement.
    pub created: Entry,
}

/// Prefixes the forward marker unless content already starts with one.
pub fn with_forward_marker(content: &str) -> String {
    if content.starts_with(FORWARD_MARKER.trim_end()) {
        content.to_string()
    } else {
        format!("{FORWARD_MARKER}{content}")
    }
}

/// Removes every leading forward marker.
pub fn strip_forward_marker(content: &str) -> String {
    LEADING_MARKERS_RE.replace(content, "").into_owned()
}

/// Carries a stale pending task over to `now`'s day.
pub fn forward_task(old: &Entry, now: NaiveDateTime) -> Transition {
    let mut retired = old.clone();
    retired.has_migrated = true;

    let created = Entry {
        id: Uuid::new_v4(),
        kind: old.kind,
        content: with_forward_marker(&old.content),
        status: Some(TaskStatus::Pending),
        priority: old.priority,
        date: start_of_day(now),
        scheduled_date: None,
        is_future_entry: false,
        has_migrated: false,
        original_date: Some(old.age_anchor()),
        tags: old.tags.clone(),
        collection_id: old.collection_id,
        special: None,
        archived: false,
        archived_from: None,
        created_at: now,
    };

    Transition { retired, created }
}

/// Copies a due future entry into the daily log on its scheduled day.
///
/// Returns `None` for dateless future entries, which never become due.
pub fn promote_future_entry(old: &Entry, now: NaiveDateTime) -> Option<Transition> {
    let scheduled_date = old.scheduled_date?;
    let mut retired = old.clone();
    retired.has_migrated = true;

    let created = Entry {
        id: Uuid::new_v4(),
        kind: old.kind,
        content: old.content.clone(),
        status: old.status,
        priority: old.priority,
        date: scheduled_date,
        scheduled_date: None,
        is_future_entry: false,
        has_migrated: false,
        original_date: None,
        tags: old.tags.clone(),
        collection_id: old.collection_id,
        special: None,
        archived: false,
        archived_from: None,
        created_at: now,
    };

    Some(Transition { retired, created })
}

/// Builds the permanent copy of `source` inside a month archive.
pub fn archive_copy(source: &Entry, archive: &Collection, now: NaiveDateTime) -> Entry {
    Entry {
        id: Uuid::new_v4(),
        kind: source.kind,
        content: source.content.clone(),
        status: source.status,
        priority: source.priority,
        date: source.date,
        scheduled_date: None,
        is_future_entry: false,
        has_migrated: source.has_migrated,
        original_date: source.original_date,
        tags: source.tags.clone(),
        collection_id: Some(archive.id),
        special: source.special.clone(),
        archived: true,
        archived_from: Some(source.id),
        created_at: now,
    }
}

/// Parks a task in the Future Log without a due date and restarts its age.
pub fn defer_to_future_log(task: &Entry, future_log: CollectionId) -> Entry {
    let mut deferred = task.clone();
    deferred.content = strip_forward_marker(&task.content);
    deferred.is_future_entry = true;
    deferred.scheduled_date = None;
    deferred.original_date = None;
    deferred.collection_id = Some(future_log);
    deferred
}

/// Moves a task to `to_date` and restarts its age.
///
/// Dates after `now`'s day turn the task into a future entry due on that day;
/// otherwise the task leaves the Future Log for the daily log.
pub fn reschedule_task(
    task: &Entry,
    to_date: NaiveDateTime,
    now: NaiveDateTime,
    future_log: CollectionId,
) -> Entry {
    let target = start_of_day(to_date);
    let mut rescheduled = task.clone();
    rescheduled.content = strip_forward_marker(&task.content);
    rescheduled.original_date = None;
    rescheduled.date = target;
    if target > start_of_day(now) {
        rescheduled.is_future_entry = true;
        rescheduled.scheduled_date = Some(target);
        rescheduled.collection_id = Some(future_log);
    } else {
        rescheduled.is_future_entry = false;
        rescheduled.scheduled_date = None;
        if rescheduled.collection_id == Some(future_log) {
            rescheduled.collection_id = None;
        }
    }
    rescheduled
}
