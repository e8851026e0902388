//! Checkpoint store for batch-job idempotency markers.
//!
//! # Invariants
//! - Exactly two markers exist: last migration day and last archived month.
//! - Markers survive process restart; writes are last-writer-wins.

use crate::repo::{ensure_migrated, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

const LAST_MIGRATION_DATE_KEY: &str = "last_migration_date";
const LAST_ARCHIVED_MONTH_KEY: &str = "last_archived_month";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Persistence contract for the two gating markers.
pub trait CheckpointStore {
    fn last_migration_date(&self) -> RepoResult<Option<NaiveDate>>;
    fn set_last_migration_date(&self, day: NaiveDate) -> RepoResult<()>;
    /// Month key in `{year}-{month}` form.
    fn last_archived_month(&self) -> RepoResult<Option<String>>;
    fn set_last_archived_month(&self, month_key: &str) -> RepoResult<()>;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for &S {
    fn last_migration_date(&self) -> RepoResult<Option<NaiveDate>> {
        (**self).last_migration_date()
    }

    fn set_last_migration_date(&self, day: NaiveDate) -> RepoResult<()> {
        (**self).set_last_migration_date(day)
    }

    fn last_archived_month(&self) -> RepoResult<Option<String>> {
        (**self).last_archived_month()
    }

    fn set_last_archived_month(&self, month_key: &str) -> RepoResult<()> {
        (**self).set_last_archived_month(month_key)
    }
}

/// SQLite-backed checkpoint store (`checkpoints` key/value table).
pub struct SqliteCheckpointStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCheckpointStore<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self { conn })
    }

    fn read(&self, key: &str) -> RepoResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM checkpoints WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO checkpoints (key, value)
             VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![key, value],
        )?;
        Ok(())
    }
}

impl CheckpointStore for SqliteCheckpointStore<'_> {
    fn last_migration_date(&self) -> RepoResult<Option<NaiveDate>> {
        match self.read(LAST_MIGRATION_DATE_KEY)? {
            Some(value) => NaiveDate::parse_from_str(&value, DAY_FORMAT)
                .map(Some)
                .map_err(|_| {
                    RepoError::InvalidData(format!(
                        "invalid day `{value}` in checkpoint `{LAST_MIGRATION_DATE_KEY}`"
                    ))
                }),
            None => Ok(None),
        }
    }

    fn set_last_migration_date(&self, day: NaiveDate) -> RepoResult<()> {
        self.write(
            LAST_MIGRATION_DATE_KEY,
            &day.format(DAY_FORMAT).to_string(),
        )
    }

    fn last_archived_month(&self) -> RepoResult<Option<String>> {
        self.read(LAST_ARCHIVED_MONTH_KEY)
    }

    fn set_last_archived_month(&self, month_key: &str) -> RepoResult<()> {
        self.write(LAST_ARCHIVED_MONTH_KEY, month_key)
    }
}
