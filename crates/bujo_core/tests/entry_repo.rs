use bujo_core::db::open_db_in_memory;
use bujo_core::model::transition::archive_copy;
use bujo_core::{
    CollectionRegistry, Entry, EntryBatch, EntryKind, EntryQuery, EntryRepository,
    EntryValidationError, RepoError, SpecialEntry, SpecialEntryType, SqliteCollectionRepository,
    SqliteEntryRepository, TaskStatus, YearMonth,
};
use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

fn at(month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

#[test]
fn create_and_get_entry_round_trips_all_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();

    let mut entry = Entry::future(EntryKind::Event, "dentist", at(1, 2, 0), Some(at(1, 9, 14)));
    entry.tags = vec!["Health".to_string(), " health ".to_string(), "Errands".to_string()];
    entry.original_date = Some(at(1, 1, 0));
    let id = repo.create_entry(&entry).unwrap();

    let loaded = repo.get_entry(id).unwrap().unwrap();
    assert_eq!(loaded.content, "dentist");
    assert_eq!(loaded.kind, EntryKind::Event);
    assert_eq!(loaded.status, None);
    assert!(loaded.is_future_entry);
    assert_eq!(loaded.scheduled_date, Some(at(1, 9, 14)));
    assert_eq!(loaded.original_date, Some(at(1, 1, 0)));
    assert_eq!(loaded.tags, vec!["errands".to_string(), "health".to_string()]);
    assert!(!loaded.has_migrated);
    assert!(!loaded.archived);
}

#[test]
fn get_entry_returns_none_for_unknown_id() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    assert!(repo.get_entry(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn create_entry_rejects_invalid_model() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();

    let mut note = Entry::new(EntryKind::Note, "n", at(1, 1, 0));
    note.status = Some(TaskStatus::Pending);
    let err = repo.create_entry(&note).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(EntryValidationError::UnexpectedTaskStatus { .. })
    ));
}

#[test]
fn apply_batch_rolls_back_every_change_on_failure() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    let task = Entry::task("keep me", at(1, 1, 9));
    repo.create_entry(&task).unwrap();

    let fresh = Entry::task("never written", at(1, 2, 0));
    let missing = Entry::task("not stored", at(1, 1, 0));
    let batch = EntryBatch {
        created: vec![fresh.clone()],
        retired: vec![task.id],
        updated: vec![missing.clone()],
    };

    let err = repo.apply_batch(&batch).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == missing.id));
    assert!(!repo.get_entry(task.id).unwrap().unwrap().has_migrated);
    assert!(repo.get_entry(fresh.id).unwrap().is_none());
}

#[test]
fn apply_batch_retires_updates_and_creates_together() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    let retired = Entry::task("old", at(1, 1, 9));
    let mut updated = Entry::task("edit me", at(1, 1, 10));
    repo.create_entry(&retired).unwrap();
    repo.create_entry(&updated).unwrap();

    updated.content = "edited".to_string();
    updated.tags = vec!["work".to_string()];
    let created = Entry::task("new", at(1, 2, 0));
    let batch = EntryBatch {
        created: vec![created.clone()],
        retired: vec![retired.id],
        updated: vec![updated.clone()],
    };
    repo.apply_batch(&batch).unwrap();

    let loaded_retired = repo.get_entry(retired.id).unwrap().unwrap();
    assert!(loaded_retired.has_migrated);
    assert_eq!(loaded_retired.content, "old");
    let loaded_updated = repo.get_entry(updated.id).unwrap().unwrap();
    assert_eq!(loaded_updated.content, "edited");
    assert_eq!(loaded_updated.tags, vec!["work".to_string()]);
    assert!(repo.get_entry(created.id).unwrap().is_some());
}

#[test]
fn stale_pending_query_filters_by_flags_and_orders_by_date() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();

    let later = Entry::task("later", at(1, 3, 8));
    let earlier = Entry::task("earlier", at(1, 1, 8));
    let today = Entry::task("today", at(1, 4, 8));
    let mut done = Entry::task("done", at(1, 1, 9));
    done.status = Some(TaskStatus::Completed);
    let mut retired = Entry::task("retired", at(1, 1, 10));
    retired.has_migrated = true;
    let mut review = Entry::task("review", at(1, 1, 11));
    review.special = Some(SpecialEntry {
        kind: SpecialEntryType::Review,
        target_month: Some(at(1, 1, 0)),
        is_draft: false,
    });
    let future = Entry::future(EntryKind::Task, "future", at(1, 1, 12), None);
    let note = Entry::new(EntryKind::Note, "note", at(1, 1, 13));
    for entry in [&later, &earlier, &today, &done, &retired, &review, &future, &note] {
        repo.create_entry(entry).unwrap();
    }

    let scan = repo
        .query_entries(&EntryQuery::stale_pending_tasks(at(1, 4, 0)))
        .unwrap();
    let contents: Vec<&str> = scan.entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["earlier", "later"]);
    assert!(scan.rejected.is_empty());
}

#[test]
fn query_reports_undecodable_rows_without_failing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    let good = Entry::task("good", at(1, 1, 8));
    repo.create_entry(&good).unwrap();

    conn.execute(
        "INSERT INTO entries (uuid, kind, content, task_status, date, created_at)
         VALUES ('not-a-uuid', 'task', 'broken', 'pending', ?1, ?1);",
        [at(1, 1, 9).and_utc().timestamp_millis()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO entries (uuid, kind, content, task_status, date, created_at)
         VALUES (?1, 'task', 'dateless', 'pending', NULL, ?2);",
        rusqlite::params![Uuid::new_v4().to_string(), at(1, 1, 9).and_utc().timestamp_millis()],
    )
    .unwrap();

    let scan = repo
        .query_entries(&EntryQuery {
            kind: Some(EntryKind::Task),
            ..EntryQuery::default()
        })
        .unwrap();
    assert_eq!(scan.entries.len(), 1);
    assert_eq!(scan.entries[0].id, good.id);
    assert_eq!(scan.rejected.len(), 2);
    assert!(scan
        .rejected
        .iter()
        .any(|err| matches!(err, EntryValidationError::InvalidId(value) if value == "not-a-uuid")));
    assert!(scan
        .rejected
        .iter()
        .any(|err| matches!(err, EntryValidationError::MissingDate(_))));
}

#[test]
fn aged_query_uses_original_date_when_present() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();

    let mut carried = Entry::task("carried", at(1, 7, 0));
    carried.original_date = Some(at(1, 1, 0));
    let recent = Entry::task("recent", at(1, 6, 0));
    repo.create_entry(&carried).unwrap();
    repo.create_entry(&recent).unwrap();

    let scan = repo
        .query_entries(&EntryQuery::aged_pending_tasks(at(1, 3, 0)))
        .unwrap();
    assert_eq!(scan.entries.len(), 1);
    assert_eq!(scan.entries[0].id, carried.id);
}

#[test]
fn retiring_an_already_retired_entry_fails_the_batch() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    let task = Entry::task("once", at(1, 1, 9));
    repo.create_entry(&task).unwrap();

    let first_copy = Entry::task("→ once", at(1, 2, 0));
    repo.apply_batch(&EntryBatch {
        created: vec![first_copy],
        retired: vec![task.id],
        updated: Vec::new(),
    })
    .unwrap();

    let second_copy = Entry::task("→ once", at(1, 2, 0));
    let err = repo
        .apply_batch(&EntryBatch {
            created: vec![second_copy.clone()],
            retired: vec![task.id],
            updated: Vec::new(),
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(id) if id == task.id));
    assert!(repo.get_entry(second_copy.id).unwrap().is_none());

    let missing = Uuid::new_v4();
    let err = repo
        .apply_batch(&EntryBatch {
            retired: vec![missing],
            ..EntryBatch::default()
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == missing));
}

#[test]
fn second_archive_copy_of_a_source_is_a_conflict() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntryRepository::try_new(&conn).unwrap();
    let registry = CollectionRegistry::new(SqliteCollectionRepository::try_new(&conn).unwrap());
    let archive = registry
        .month_archive(YearMonth::new(2025, 1).unwrap())
        .unwrap();
    let source = Entry::task("source", at(1, 3, 9));
    repo.create_entry(&source).unwrap();

    repo.create_entry(&archive_copy(&source, &archive, at(2, 1, 0)))
        .unwrap();
    let err = repo
        .create_entry(&archive_copy(&source, &archive, at(2, 1, 1)))
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(id) if id == source.id));
    assert_eq!(repo.archived_sources(archive.id).unwrap().len(), 1);
}
