//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage contracts the migration engine consumes.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Batch writes are all-or-nothing.
//! - Undecodable rows are reported per row, never masked and never fatal
//!   for the rest of a query.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::entry::EntryValidationError;
use chrono::{DateTime, NaiveDateTime};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod checkpoint_repo;
pub mod collection_repo;
pub mod entry_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by entry, collection and checkpoint stores.
#[derive(Debug)]
pub enum RepoError {
    Validation(EntryValidationError),
    Db(DbError),
    NotFound(Uuid),
    /// Another writer already changed the record this batch depends on.
    Conflict(Uuid),
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::Conflict(id) => write!(f, "record changed by another writer: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::Conflict(_) => None,
            Self::InvalidData(_) => None,
            Self::UninitializedConnection { .. } => None,
        }
    }
}

impl From<EntryValidationError> for RepoError {
    fn from(value: EntryValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Rejects connections that did not go through `open_db*`.
pub(crate) fn ensure_migrated(conn: &Connection) -> RepoResult<()> {
    let actual_version = current_user_version(conn)?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

/// Encodes a wall-clock timestamp as epoch milliseconds.
pub(crate) fn to_epoch_ms(value: NaiveDateTime) -> i64 {
    value.and_utc().timestamp_millis()
}

pub(crate) fn from_epoch_ms(value: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(value).map(|value| value.naive_utc())
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
