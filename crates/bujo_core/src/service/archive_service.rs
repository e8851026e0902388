//! Month-end archival use-case service.
//!
//! # Responsibility
//! - Once per calendar month, copy the previous month's daily-log entries
//!   into that month's archive collection.
//!
//! # Invariants
//! - Source entries are never modified; archive copies are new entries.
//! - A source gets at most one copy per archive, even when the checkpoint
//!   write of an earlier run was lost.
//! - The month checkpoint advances only after the copy batch commits.
//! - A copy batch that collides with another writer's copies of the same
//!   month reports `AlreadyArchived` once that writer's checkpoint is visible.

use crate::model::calendar::YearMonth;
use crate::model::collection::Collection;
use crate::model::transition::archive_copy;
use crate::repo::checkpoint_repo::CheckpointStore;
use crate::repo::collection_repo::CollectionRepository;
use crate::repo::entry_repo::{EntryBatch, EntryQuery, EntryRepository};
use crate::repo::RepoError;
use crate::service::collection_registry::CollectionRegistry;
use crate::service::migration_service::{log_rejected, MigrationError, MigrationResult};
use chrono::NaiveDateTime;
use log::{error, info};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivalOutcome {
    /// The checkpoint already covers the current month.
    AlreadyArchived,
    Archived,
}

/// Summary of one archival attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalReport {
    /// Current month key (`{year}-{month}`) the checkpoint is compared to.
    pub month_key: String,
    pub outcome: ArchivalOutcome,
    /// Month whose entries were archived.
    pub archived_month: Option<YearMonth>,
    pub archive: Option<Collection>,
    /// New copies written by this run.
    pub copied: usize,
    /// Sources that already had a copy in the archive.
    pub already_present: usize,
    /// Rows skipped because they failed validation.
    pub skipped: usize,
}

impl ArchivalReport {
    fn already_archived(month_key: String) -> Self {
        Self {
            month_key,
            outcome: ArchivalOutcome::AlreadyArchived,
            archived_month: None,
            archive: None,
            copied: 0,
            already_present: 0,
            skipped: 0,
        }
    }
}

/// Archival service over injected stores.
pub struct ArchiveService<E, C, K>
where
    E: EntryRepository,
    C: CollectionRepository,
    K: CheckpointStore,
{
    entries: E,
    registry: CollectionRegistry<C>,
    checkpoints: K,
}

impl<E, C, K> ArchiveService<E, C, K>
where
    E: EntryRepository,
    C: CollectionRepository,
    K: CheckpointStore,
{
    pub fn new(entries: E, collections: C, checkpoints: K) -> Self {
        Self {
            entries,
            registry: CollectionRegistry::new(collections),
            checkpoints,
        }
    }

    /// Archives the month before `now`'s month, once per calendar month.
    pub fn run_month_end_archival(&self, now: NaiveDateTime) -> MigrationResult<ArchivalReport> {
        let started_at = Instant::now();
        let current = YearMonth::of(now.date());
        let month_key = current.key();

        let result = self.archive_previous_month(now, current, month_key.clone());
        match &result {
            Ok(report) if report.outcome == ArchivalOutcome::AlreadyArchived => info!(
                "event=month_archival module=archive status=skip month_key={} reason=checkpoint",
                month_key
            ),
            Ok(report) => info!(
                "event=month_archival module=archive status=ok month_key={} duration_ms={} copied={} already_present={} skipped={}",
                month_key,
                started_at.elapsed().as_millis(),
                report.copied,
                report.already_present,
                report.skipped
            ),
            Err(err) => error!(
                "event=month_archival module=archive status=error month_key={} error_code={} error={}",
                month_key,
                err.code(),
                err
            ),
        }
        result
    }

    fn archive_previous_month(
        &self,
        now: NaiveDateTime,
        current: YearMonth,
        month_key: String,
    ) -> MigrationResult<ArchivalReport> {
        let last_key = self
            .checkpoints
            .last_archived_month()
            .map_err(MigrationError::QueryFailed)?;
        if last_key.as_deref() == Some(month_key.as_str()) {
            return Ok(ArchivalReport::already_archived(month_key));
        }

        let previous = current.previous();
        let (start, end) = previous.bounds().ok_or_else(|| {
            MigrationError::QueryFailed(RepoError::InvalidData(format!(
                "month {previous} is outside the supported calendar range"
            )))
        })?;

        let scan = self
            .entries
            .query_entries(&EntryQuery::archivable_in(start, end))
            .map_err(MigrationError::QueryFailed)?;
        let skipped = log_rejected("archive", scan.rejected);

        let archive = self
            .registry
            .month_archive(previous)
            .map_err(MigrationError::SaveFailed)?;
        let existing = self
            .entries
            .archived_sources(archive.id)
            .map_err(MigrationError::QueryFailed)?;

        let mut batch = EntryBatch::new();
        let mut already_present = 0;
        for entry in &scan.entries {
            if existing.contains(&entry.id) {
                already_present += 1;
                continue;
            }
            batch.created.push(archive_copy(entry, &archive, now));
        }

        let copied = batch.created.len();
        match self.entries.apply_batch(&batch) {
            Ok(()) => {}
            Err(RepoError::Conflict(id)) => {
                let last_key = self
                    .checkpoints
                    .last_archived_month()
                    .map_err(MigrationError::QueryFailed)?;
                if last_key.as_deref() == Some(month_key.as_str()) {
                    return Ok(ArchivalReport::already_archived(month_key));
                }
                return Err(MigrationError::SaveFailed(RepoError::Conflict(id)));
            }
            Err(err) => return Err(MigrationError::SaveFailed(err)),
        }
        self.checkpoints
            .set_last_archived_month(&month_key)
            .map_err(MigrationError::SaveFailed)?;

        Ok(ArchivalReport {
            month_key,
            outcome: ArchivalOutcome::Archived,
            archived_month: Some(previous),
            archive: Some(archive),
            copied,
            already_present,
            skipped,
        })
    }
}
