//! Entry repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Answer the compound predicate queries the migration engine issues.
//! - Apply creates, retirements and field updates as one atomic batch.
//!
//! # Invariants
//! - `apply_batch` either commits every change or none.
//! - Query results are ordered by `date ASC, created_at ASC, uuid ASC`.
//! - Rows that fail decoding land in `EntryScan::rejected`; the rest of the
//!   query still succeeds.
//! - Tag names are stored lowercase and deduplicated.
//! - An entry is retired at most once. Retiring an already retired entry,
//!   or copying a source into an archive twice, fails the whole batch with
//!   `RepoError::Conflict`, so concurrent writers cannot both commit.

use crate::model::collection::CollectionId;
use crate::model::entry::{
    Entry, EntryId, EntryKind, EntryValidationError, Priority, SpecialEntry, SpecialEntryType,
    TaskStatus,
};
use crate::model::transition::Transition;
use crate::repo::{
    bool_to_int, ensure_migrated, from_epoch_ms, to_epoch_ms, RepoError, RepoResult,
};
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

const ENTRY_SELECT_SQL: &str = "SELECT
    uuid,
    kind,
    content,
    task_status,
    priority,
    date,
    scheduled_date,
    is_future_entry,
    has_migrated,
    original_date,
    collection_uuid,
    special_type,
    target_month,
    is_draft,
    archived,
    archived_from,
    created_at
FROM entries";

/// Compound predicate over entries. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub kind: Option<EntryKind>,
    pub status: Option<TaskStatus>,
    /// Inclusive lower bound on `date`.
    pub date_from: Option<NaiveDateTime>,
    /// Exclusive upper bound on `date`.
    pub date_before: Option<NaiveDateTime>,
    /// Exclusive upper bound on `original_date`, falling back to `date`.
    pub age_anchor_before: Option<NaiveDateTime>,
    /// Inclusive upper bound on `scheduled_date`; rows without one never match.
    pub scheduled_until: Option<NaiveDateTime>,
    pub is_future_entry: Option<bool>,
    pub has_migrated: Option<bool>,
    pub archived: Option<bool>,
    /// Skip review/outlook entries.
    pub exclude_special: bool,
    pub collection_id: Option<CollectionId>,
}

impl EntryQuery {
    /// Daily-log pending tasks dated before `today_start` that were never
    /// forwarded.
    pub fn stale_pending_tasks(today_start: NaiveDateTime) -> Self {
        Self {
            kind: Some(EntryKind::Task),
            status: Some(TaskStatus::Pending),
            date_before: Some(today_start),
            is_future_entry: Some(false),
            has_migrated: Some(false),
            archived: Some(false),
            exclude_special: true,
            ..Self::default()
        }
    }

    /// Future entries due no later than `until` that were never promoted.
    pub fn due_future_entries(until: NaiveDateTime) -> Self {
        Self {
            is_future_entry: Some(true),
            scheduled_until: Some(until),
            has_migrated: Some(false),
            archived: Some(false),
            ..Self::default()
        }
    }

    /// Live daily-log pending tasks whose first occurrence is before `cutoff`.
    pub fn aged_pending_tasks(cutoff: NaiveDateTime) -> Self {
        Self {
            kind: Some(EntryKind::Task),
            status: Some(TaskStatus::Pending),
            age_anchor_before: Some(cutoff),
            is_future_entry: Some(false),
            has_migrated: Some(false),
            archived: Some(false),
            exclude_special: true,
            ..Self::default()
        }
    }

    /// Daily-log entries dated within `[start, end)` that are not archive copies.
    pub fn archivable_in(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            date_from: Some(start),
            date_before: Some(end),
            is_future_entry: Some(false),
            archived: Some(false),
            ..Self::default()
        }
    }
}

/// Query outcome split into usable entries and rejected rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryScan {
    pub entries: Vec<Entry>,
    pub rejected: Vec<EntryValidationError>,
}

/// Set of mutations committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBatch {
    /// New entries to insert.
    pub created: Vec<Entry>,
    /// Entries whose `has_migrated` flag is set; nothing else changes.
    pub retired: Vec<EntryId>,
    /// Full-field replacements of existing entries.
    pub updated: Vec<Entry>,
}

impl EntryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one append-only transition.
    pub fn push_transition(&mut self, transition: Transition) {
        self.retired.push(transition.retired.id);
        self.created.push(transition.created);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.retired.is_empty() && self.updated.is_empty()
    }
}

/// Repository interface for entry persistence.
pub trait EntryRepository {
    /// Loads one entry by id.
    fn get_entry(&self, id: EntryId) -> RepoResult<Option<Entry>>;
    /// Runs a compound predicate query.
    fn query_entries(&self, query: &EntryQuery) -> RepoResult<EntryScan>;
    /// Ids of entries that already have a copy inside `archive`.
    fn archived_sources(&self, archive: CollectionId) -> RepoResult<HashSet<EntryId>>;
    /// Applies every change in `batch` atomically.
    fn apply_batch(&self, batch: &EntryBatch) -> RepoResult<()>;

    /// Inserts one entry.
    fn create_entry(&self, entry: &Entry) -> RepoResult<EntryId> {
        let batch = EntryBatch {
            created: vec![entry.clone()],
            ..EntryBatch::default()
        };
        self.apply_batch(&batch)?;
        Ok(entry.id)
    }
}

impl<R: EntryRepository + ?Sized> EntryRepository for &R {
    fn get_entry(&self, id: EntryId) -> RepoResult<Option<Entry>> {
        (**self).get_entry(id)
    }

    fn query_entries(&self, query: &EntryQuery) -> RepoResult<EntryScan> {
        (**self).query_entries(query)
    }

    fn archived_sources(&self, archive: CollectionId) -> RepoResult<HashSet<EntryId>> {
        (**self).archived_sources(archive)
    }

    fn apply_batch(&self, batch: &EntryBatch) -> RepoResult<()> {
        (**self).apply_batch(batch)
    }
}

/// SQLite-backed entry repository.
pub struct SqliteEntryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntryRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self { conn })
    }
}

impl EntryRepository for SqliteEntryRepository<'_> {
    fn get_entry(&self, id: EntryId) -> RepoResult<Option<Entry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENTRY_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw = RawEntryRow::read(row)?;
        let tags = load_tags_for_entry(self.conn, &raw.uuid)?;
        Ok(Some(raw.into_entry(tags)?))
    }

    fn query_entries(&self, query: &EntryQuery) -> RepoResult<EntryScan> {
        let mut sql = format!("{ENTRY_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(kind) = query.kind {
            sql.push_str(" AND kind = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND task_status = ?");
            bind_values.push(Value::Text(task_status_to_db(status).to_string()));
        }
        if let Some(from) = query.date_from {
            sql.push_str(" AND date >= ?");
            bind_values.push(Value::Integer(to_epoch_ms(from)));
        }
        if let Some(before) = query.date_before {
            sql.push_str(" AND date < ?");
            bind_values.push(Value::Integer(to_epoch_ms(before)));
        }
        if let Some(cutoff) = query.age_anchor_before {
            sql.push_str(" AND COALESCE(original_date, date) < ?");
            bind_values.push(Value::Integer(to_epoch_ms(cutoff)));
        }
        if let Some(until) = query.scheduled_until {
            sql.push_str(" AND scheduled_date IS NOT NULL AND scheduled_date <= ?");
            bind_values.push(Value::Integer(to_epoch_ms(until)));
        }
        if let Some(flag) = query.is_future_entry {
            sql.push_str(" AND is_future_entry = ?");
            bind_values.push(Value::Integer(bool_to_int(flag)));
        }
        if let Some(flag) = query.has_migrated {
            sql.push_str(" AND has_migrated = ?");
            bind_values.push(Value::Integer(bool_to_int(flag)));
        }
        if let Some(flag) = query.archived {
            sql.push_str(" AND archived = ?");
            bind_values.push(Value::Integer(bool_to_int(flag)));
        }
        if query.exclude_special {
            sql.push_str(" AND special_type IS NULL");
        }
        if let Some(collection_id) = query.collection_id {
            sql.push_str(" AND collection_uuid = ?");
            bind_values.push(Value::Text(collection_id.to_string()));
        }

        sql.push_str(" ORDER BY date ASC, created_at ASC, uuid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut raw_rows = Vec::new();
        while let Some(row) = rows.next()? {
            raw_rows.push(RawEntryRow::read(row)?);
        }

        let mut scan = EntryScan::default();
        for raw in raw_rows {
            let tags = load_tags_for_entry(self.conn, &raw.uuid)?;
            match raw.into_entry(tags) {
                Ok(entry) => scan.entries.push(entry),
                Err(err) => scan.rejected.push(err),
            }
        }
        Ok(scan)
    }

    fn archived_sources(&self, archive: CollectionId) -> RepoResult<HashSet<EntryId>> {
        let mut stmt = self.conn.prepare(
            "SELECT archived_from
             FROM entries
             WHERE collection_uuid = ?1
               AND archived = 1
               AND archived_from IS NOT NULL;",
        )?;
        let mut rows = stmt.query([archive.to_string()])?;
        let mut sources = HashSet::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            let id = Uuid::parse_str(&value).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid uuid value `{value}` in entries.archived_from"
                ))
            })?;
            sources.insert(id);
        }
        Ok(sources)
    }

    fn apply_batch(&self, batch: &EntryBatch) -> RepoResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Dropping `tx` on any early return rolls the whole batch back.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for id in &batch.retired {
            retire_entry_in_tx(&tx, *id)?;
        }
        for entry in &batch.updated {
            update_entry_in_tx(&tx, entry)?;
        }
        for entry in &batch.created {
            insert_entry_in_tx(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Normalizes one tag value: trimmed, lowercase, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates tag values.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        if let Some(value) = normalize_tag(tag) {
            unique.insert(value);
        }
    }
    unique.into_iter().collect()
}

/// Column values as stored, before typed decoding.
struct RawEntryRow {
    uuid: String,
    kind: String,
    content: String,
    task_status: Option<String>,
    priority: String,
    date: Option<i64>,
    scheduled_date: Option<i64>,
    is_future_entry: i64,
    has_migrated: i64,
    original_date: Option<i64>,
    collection_uuid: Option<String>,
    special_type: Option<String>,
    target_month: Option<i64>,
    is_draft: i64,
    archived: i64,
    archived_from: Option<String>,
    created_at: i64,
}

impl RawEntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get("uuid")?,
            kind: row.get("kind")?,
            content: row.get("content")?,
            task_status: row.get("task_status")?,
            priority: row.get("priority")?,
            date: row.get("date")?,
            scheduled_date: row.get("scheduled_date")?,
            is_future_entry: row.get("is_future_entry")?,
            has_migrated: row.get("has_migrated")?,
            original_date: row.get("original_date")?,
            collection_uuid: row.get("collection_uuid")?,
            special_type: row.get("special_type")?,
            target_month: row.get("target_month")?,
            is_draft: row.get("is_draft")?,
            archived: row.get("archived")?,
            archived_from: row.get("archived_from")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_entry(self, tags: Vec<String>) -> Result<Entry, EntryValidationError> {
        let id = Uuid::parse_str(&self.uuid)
            .map_err(|_| EntryValidationError::InvalidId(self.uuid.clone()))?;
        let invalid = |column: &'static str, value: String| EntryValidationError::InvalidField {
            id,
            column,
            value,
        };

        let kind = parse_entry_kind(&self.kind).ok_or_else(|| invalid("kind", self.kind.clone()))?;
        let status = match self.task_status {
            Some(value) => {
                Some(parse_task_status(&value).ok_or_else(|| invalid("task_status", value))?)
            }
            None => None,
        };
        let priority =
            parse_priority(&self.priority).ok_or_else(|| invalid("priority", self.priority.clone()))?;
        let date = self
            .date
            .ok_or(EntryValidationError::MissingDate(id))
            .and_then(|ms| decode_ms(ms).ok_or_else(|| invalid("date", ms.to_string())))?;
        let scheduled_date = decode_optional_ms(self.scheduled_date)
            .map_err(|ms| invalid("scheduled_date", ms.to_string()))?;
        let original_date = decode_optional_ms(self.original_date)
            .map_err(|ms| invalid("original_date", ms.to_string()))?;
        let collection_id = decode_optional_uuid(self.collection_uuid)
            .map_err(|value| invalid("collection_uuid", value))?;
        let archived_from = decode_optional_uuid(self.archived_from)
            .map_err(|value| invalid("archived_from", value))?;
        let created_at =
            decode_ms(self.created_at).ok_or_else(|| invalid("created_at", self.created_at.to_string()))?;

        let special = match self.special_type {
            Some(value) => Some(SpecialEntry {
                kind: parse_special_type(&value).ok_or_else(|| invalid("special_type", value))?,
                target_month: decode_optional_ms(self.target_month)
                    .map_err(|ms| invalid("target_month", ms.to_string()))?,
                is_draft: decode_flag(self.is_draft).ok_or_else(|| {
                    invalid("is_draft", self.is_draft.to_string())
                })?,
            }),
            None => None,
        };

        let entry = Entry {
            id,
            kind,
            content: self.content,
            status,
            priority,
            date,
            scheduled_date,
            is_future_entry: decode_flag(self.is_future_entry)
                .ok_or_else(|| invalid("is_future_entry", self.is_future_entry.to_string()))?,
            has_migrated: decode_flag(self.has_migrated)
                .ok_or_else(|| invalid("has_migrated", self.has_migrated.to_string()))?,
            original_date,
            tags,
            collection_id,
            special,
            archived: decode_flag(self.archived)
                .ok_or_else(|| invalid("archived", self.archived.to_string()))?,
            archived_from,
            created_at,
        };
        entry.validate()?;
        Ok(entry)
    }
}

fn insert_entry_in_tx(tx: &Transaction<'_>, entry: &Entry) -> RepoResult<()> {
    entry.validate()?;
    let special = entry.special.as_ref();
    let inserted = tx.execute(
        "INSERT INTO entries (
            uuid,
            kind,
            content,
            task_status,
            priority,
            date,
            scheduled_date,
            is_future_entry,
            has_migrated,
            original_date,
            collection_uuid,
            special_type,
            target_month,
            is_draft,
            archived,
            archived_from,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17);",
        params![
            entry.id.to_string(),
            entry.kind.as_str(),
            entry.content.as_str(),
            entry.status.map(task_status_to_db),
            priority_to_db(entry.priority),
            to_epoch_ms(entry.date),
            entry.scheduled_date.map(to_epoch_ms),
            bool_to_int(entry.is_future_entry),
            bool_to_int(entry.has_migrated),
            entry.original_date.map(to_epoch_ms),
            entry.collection_id.map(|id| id.to_string()),
            special.map(|value| special_type_to_db(value.kind)),
            special.and_then(|value| value.target_month).map(to_epoch_ms),
            bool_to_int(special.is_some_and(|value| value.is_draft)),
            bool_to_int(entry.archived),
            entry.archived_from.map(|id| id.to_string()),
            to_epoch_ms(entry.created_at),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if entry.archived && is_constraint_violation(&err) => {
            return Err(RepoError::Conflict(entry.archived_from.unwrap_or(entry.id)));
        }
        Err(err) => return Err(err.into()),
    }
    replace_tags_in_tx(tx, entry.id, &entry.tags)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn update_entry_in_tx(tx: &Transaction<'_>, entry: &Entry) -> RepoResult<()> {
    entry.validate()?;
    let special = entry.special.as_ref();
    let changed = tx.execute(
        "UPDATE entries
         SET
            kind = ?2,
            content = ?3,
            task_status = ?4,
            priority = ?5,
            date = ?6,
            scheduled_date = ?7,
            is_future_entry = ?8,
            has_migrated = ?9,
            original_date = ?10,
            collection_uuid = ?11,
            special_type = ?12,
            target_month = ?13,
            is_draft = ?14,
            archived = ?15,
            archived_from = ?16,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1;",
        params![
            entry.id.to_string(),
            entry.kind.as_str(),
            entry.content.as_str(),
            entry.status.map(task_status_to_db),
            priority_to_db(entry.priority),
            to_epoch_ms(entry.date),
            entry.scheduled_date.map(to_epoch_ms),
            bool_to_int(entry.is_future_entry),
            bool_to_int(entry.has_migrated),
            entry.original_date.map(to_epoch_ms),
            entry.collection_id.map(|id| id.to_string()),
            special.map(|value| special_type_to_db(value.kind)),
            special.and_then(|value| value.target_month).map(to_epoch_ms),
            bool_to_int(special.is_some_and(|value| value.is_draft)),
            bool_to_int(entry.archived),
            entry.archived_from.map(|id| id.to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound(entry.id));
    }
    replace_tags_in_tx(tx, entry.id, &entry.tags)
}

/// Sets the one-shot flag. An entry that is already retired fails the batch.
fn retire_entry_in_tx(tx: &Transaction<'_>, id: EntryId) -> RepoResult<()> {
    let id_text = id.to_string();
    let changed = tx.execute(
        "UPDATE entries
         SET
            has_migrated = 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1 AND has_migrated = 0;",
        [id_text.as_str()],
    )?;
    if changed > 0 {
        return Ok(());
    }
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE uuid = ?1);",
        [id_text.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        Err(RepoError::Conflict(id))
    } else {
        Err(RepoError::NotFound(id))
    }
}

fn replace_tags_in_tx(tx: &Transaction<'_>, id: EntryId, tags: &[String]) -> RepoResult<()> {
    let id_text = id.to_string();
    tx.execute(
        "DELETE FROM entry_tags WHERE entry_uuid = ?1;",
        [id_text.as_str()],
    )?;
    for tag in normalize_tags(tags) {
        tx.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1);", [tag.as_str()])?;
        tx.execute(
            "INSERT OR IGNORE INTO entry_tags (entry_uuid, tag_id)
             SELECT ?1, id
             FROM tags
             WHERE name = ?2 COLLATE NOCASE;",
            params![id_text.as_str(), tag.as_str()],
        )?;
    }
    Ok(())
}

fn load_tags_for_entry(conn: &Connection, entry_uuid: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name
         FROM entry_tags et
         INNER JOIN tags t ON t.id = et.tag_id
         WHERE et.entry_uuid = ?1
         ORDER BY t.name COLLATE NOCASE ASC;",
    )?;
    let mut rows = stmt.query([entry_uuid])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        tags.push(value.to_lowercase());
    }
    Ok(tags)
}

fn decode_ms(value: i64) -> Option<NaiveDateTime> {
    from_epoch_ms(value)
}

fn decode_optional_ms(value: Option<i64>) -> Result<Option<NaiveDateTime>, i64> {
    match value {
        Some(ms) => decode_ms(ms).map(Some).ok_or(ms),
        None => Ok(None),
    }
}

fn decode_optional_uuid(value: Option<String>) -> Result<Option<Uuid>, String> {
    match value {
        Some(text) => Uuid::parse_str(&text).map(Some).map_err(|_| text),
        None => Ok(None),
    }
}

fn decode_flag(value: i64) -> Option<bool> {
    match value {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

fn parse_entry_kind(value: &str) -> Option<EntryKind> {
    match value {
        "task" => Some(EntryKind::Task),
        "event" => Some(EntryKind::Event),
        "note" => Some(EntryKind::Note),
        _ => None,
    }
}

fn task_status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Completed => "completed",
        TaskStatus::Migrated => "migrated",
        TaskStatus::Scheduled => "scheduled",
    }
}

fn parse_task_status(value: &str) -> Option<TaskStatus> {
    match value {
        "pending" => Some(TaskStatus::Pending),
        "completed" => Some(TaskStatus::Completed),
        "migrated" => Some(TaskStatus::Migrated),
        "scheduled" => Some(TaskStatus::Scheduled),
        _ => None,
    }
}

fn priority_to_db(priority: Priority) -> &'static str {
    match priority {
        Priority::None => "none",
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

fn parse_priority(value: &str) -> Option<Priority> {
    match value {
        "none" => Some(Priority::None),
        "low" => Some(Priority::Low),
        "medium" => Some(Priority::Medium),
        "high" => Some(Priority::High),
        _ => None,
    }
}

fn special_type_to_db(kind: SpecialEntryType) -> &'static str {
    match kind {
        SpecialEntryType::Review => "review",
        SpecialEntryType::Outlook => "outlook",
    }
}

fn parse_special_type(value: &str) -> Option<SpecialEntryType> {
    match value {
        "review" => Some(SpecialEntryType::Review),
        "outlook" => Some(SpecialEntryType::Outlook),
        _ => None,
    }
}
