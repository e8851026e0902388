use bujo_core::db::open_db;
use bujo_core::{
    ArchivalOutcome, ArchiveService, CheckpointStore, CollectionId, DailyOutcome, Entry,
    EntryBatch, EntryId, EntryKind, EntryQuery, EntryRepository, EntryScan, MigrationService,
    RepoResult, SqliteCheckpointStore, SqliteCollectionRepository, SqliteEntryRepository,
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::cell::Cell;
use std::collections::HashSet;

fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn service(
    conn: &Connection,
) -> MigrationService<
    SqliteEntryRepository<'_>,
    SqliteCollectionRepository<'_>,
    SqliteCheckpointStore<'_>,
> {
    MigrationService::new(
        SqliteEntryRepository::try_new(conn).unwrap(),
        SqliteCollectionRepository::try_new(conn).unwrap(),
        SqliteCheckpointStore::try_new(conn).unwrap(),
    )
}

fn live_pending(conn: &Connection) -> Vec<Entry> {
    SqliteEntryRepository::try_new(conn)
        .unwrap()
        .query_entries(&EntryQuery {
            kind: Some(EntryKind::Task),
            has_migrated: Some(false),
            archived: Some(false),
            ..EntryQuery::default()
        })
        .unwrap()
        .entries
}

/// Read after which the other process gets to run.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Hook {
    AfterFirstQuery,
    AfterArchivedSources,
}

/// Entry store that lets another process finish its own work right after
/// this process has read its candidates and before it writes.
struct Interleaved<'conn, F: Fn()> {
    inner: SqliteEntryRepository<'conn>,
    hook: Hook,
    other_process: F,
    fired: Cell<bool>,
}

impl<'conn, F: Fn()> Interleaved<'conn, F> {
    fn new(conn: &'conn Connection, hook: Hook, other_process: F) -> Self {
        Self {
            inner: SqliteEntryRepository::try_new(conn).unwrap(),
            hook,
            other_process,
            fired: Cell::new(false),
        }
    }

    fn reached(&self, hook: Hook) {
        if self.hook == hook && !self.fired.replace(true) {
            (self.other_process)();
        }
    }
}

impl<F: Fn()> EntryRepository for Interleaved<'_, F> {
    fn get_entry(&self, id: EntryId) -> RepoResult<Option<Entry>> {
        self.inner.get_entry(id)
    }

    fn query_entries(&self, query: &EntryQuery) -> RepoResult<EntryScan> {
        let scan = self.inner.query_entries(query)?;
        self.reached(Hook::AfterFirstQuery);
        Ok(scan)
    }

    fn archived_sources(&self, archive: CollectionId) -> RepoResult<HashSet<EntryId>> {
        let sources = self.inner.archived_sources(archive)?;
        self.reached(Hook::AfterArchivedSources);
        Ok(sources)
    }

    fn apply_batch(&self, batch: &EntryBatch) -> RepoResult<()> {
        self.inner.apply_batch(batch)
    }
}

#[test]
fn two_processes_on_one_file_forward_a_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bujo.sqlite3");
    let first_conn = open_db(&path).unwrap();
    let second_conn = open_db(&path).unwrap();

    let task = Entry::task("pay rent", at(2025, 1, 1, 9));
    SqliteEntryRepository::try_new(&first_conn)
        .unwrap()
        .create_entry(&task)
        .unwrap();

    let second_forwarded = Cell::new(None);
    let first = MigrationService::new(
        Interleaved::new(&first_conn, Hook::AfterFirstQuery, || {
            let report = service(&second_conn)
                .run_daily_migration(at(2025, 1, 2, 8))
                .unwrap();
            second_forwarded.set(Some(report.forwarded));
        }),
        SqliteCollectionRepository::try_new(&first_conn).unwrap(),
        SqliteCheckpointStore::try_new(&first_conn).unwrap(),
    );

    let report = first.run_daily_migration(at(2025, 1, 2, 8)).unwrap();
    assert_eq!(second_forwarded.get(), Some(1));
    assert_eq!(report.outcome, DailyOutcome::AlreadyRan);
    assert_eq!(report.forwarded, 0);

    let live = live_pending(&first_conn);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].content, "→ pay rent");
    assert!(SqliteEntryRepository::try_new(&first_conn)
        .unwrap()
        .get_entry(task.id)
        .unwrap()
        .unwrap()
        .has_migrated);
    assert_eq!(
        SqliteCheckpointStore::try_new(&first_conn)
            .unwrap()
            .last_migration_date()
            .unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 2)
    );
}

#[test]
fn sequential_runs_from_two_processes_forward_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bujo.sqlite3");
    let first_conn = open_db(&path).unwrap();
    let second_conn = open_db(&path).unwrap();
    SqliteEntryRepository::try_new(&first_conn)
        .unwrap()
        .create_entry(&Entry::task("water plants", at(2025, 1, 1, 9)))
        .unwrap();

    let first = service(&first_conn).run_daily_migration(at(2025, 1, 2, 7)).unwrap();
    let second = service(&second_conn).run_daily_migration(at(2025, 1, 2, 9)).unwrap();
    assert_eq!(first.forwarded, 1);
    assert_eq!(second.outcome, DailyOutcome::AlreadyRan);
    assert_eq!(live_pending(&second_conn).len(), 1);
}

#[test]
fn two_processes_archive_a_month_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bujo.sqlite3");
    let first_conn = open_db(&path).unwrap();
    let second_conn = open_db(&path).unwrap();

    let entries = SqliteEntryRepository::try_new(&first_conn).unwrap();
    entries
        .create_entry(&Entry::task("plan trip", at(2024, 12, 5, 9)))
        .unwrap();
    entries
        .create_entry(&Entry::new(EntryKind::Note, "snow day", at(2024, 12, 10, 8)))
        .unwrap();

    let first = ArchiveService::new(
        Interleaved::new(&first_conn, Hook::AfterArchivedSources, || {
            let report = service(&second_conn)
                .archiver()
                .run_month_end_archival(at(2025, 1, 1, 6))
                .unwrap();
            assert_eq!(report.copied, 2);
        }),
        SqliteCollectionRepository::try_new(&first_conn).unwrap(),
        SqliteCheckpointStore::try_new(&first_conn).unwrap(),
    );

    let report = first.run_month_end_archival(at(2025, 1, 1, 6)).unwrap();
    assert_eq!(report.outcome, ArchivalOutcome::AlreadyArchived);

    let copies = entries
        .query_entries(&EntryQuery {
            archived: Some(true),
            ..EntryQuery::default()
        })
        .unwrap()
        .entries;
    assert_eq!(copies.len(), 2);
}
