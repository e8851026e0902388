//! Daily migration use-case service.
//!
//! # Responsibility
//! - Forward stale pending tasks to today and promote due future entries.
//! - Gate the daily run on the checkpoint store, then chain month-end
//!   archival and old-task detection.
//! - Offer the two user remediations for old tasks.
//!
//! # Invariants
//! - Forwarding and promotion of one run commit as a single batch; the
//!   checkpoint advances only after that batch commits.
//! - A second run on the same calendar day is a no-op.
//! - At most one run is in flight per service instance. Across processes,
//!   a run whose batch loses the retire-once race to another writer that
//!   already completed the day reports `DailyOutcome::AlreadyRan`.
//! - Invalid records are skipped and logged, never fatal.

use crate::config::MigrationSettings;
use crate::model::calendar::{end_of_day, start_of_day};
use crate::model::entry::{Entry, EntryId, EntryValidationError};
use crate::model::transition::{
    defer_to_future_log, forward_task, promote_future_entry, reschedule_task,
};
use crate::repo::checkpoint_repo::CheckpointStore;
use crate::repo::collection_repo::CollectionRepository;
use crate::repo::entry_repo::{EntryBatch, EntryQuery, EntryRepository, EntryScan};
use crate::repo::RepoError;
use crate::service::archive_service::{ArchivalReport, ArchiveService};
use crate::service::collection_registry::CollectionRegistry;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{error, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub type MigrationResult<T> = Result<T, MigrationError>;

/// Whole-invocation failures. None of them advance a checkpoint.
#[derive(Debug)]
pub enum MigrationError {
    /// Reading entries, collections or checkpoints failed.
    QueryFailed(RepoError),
    /// Writing the batch, a collection or a checkpoint failed.
    SaveFailed(RepoError),
    /// Another run on this service has not finished yet.
    InProgress,
    EntryNotFound(EntryId),
    /// Remediations only apply to tasks.
    NotATask(EntryId),
    /// The task is completed, retired by an earlier move, or an archive copy.
    NotLiveTask(EntryId),
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueryFailed(err) => write!(f, "migration query failed: {err}"),
            Self::SaveFailed(err) => write!(f, "migration save failed: {err}"),
            Self::InProgress => write!(f, "a migration run is already in progress"),
            Self::EntryNotFound(id) => write!(f, "entry not found: {id}"),
            Self::NotATask(id) => write!(f, "entry is not a task: {id}"),
            Self::NotLiveTask(id) => write!(f, "task is not open in the journal: {id}"),
        }
    }
}

impl Error for MigrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::QueryFailed(err) | Self::SaveFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl MigrationError {
    /// Short stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueryFailed(_) => "query_failed",
            Self::SaveFailed(_) => "save_failed",
            Self::InProgress => "in_progress",
            Self::EntryNotFound(_) => "entry_not_found",
            Self::NotATask(_) => "not_a_task",
            Self::NotLiveTask(_) => "not_live_task",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyOutcome {
    /// The checkpoint already covers this day.
    AlreadyRan,
    Completed,
}

/// Summary of one daily trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyMigrationReport {
    pub day: NaiveDate,
    pub outcome: DailyOutcome,
    /// Tasks carried over to today.
    pub forwarded: usize,
    /// Future entries copied into the daily log.
    pub promoted: usize,
    /// Records skipped because they failed validation.
    pub skipped: usize,
    /// `None` when archival is disabled or the day was already migrated.
    pub archival: Option<ArchivalReport>,
    /// Tasks flagged for user review.
    pub old_tasks: Vec<Entry>,
}

impl DailyMigrationReport {
    fn already_ran(day: NaiveDate) -> Self {
        Self {
            day,
            outcome: DailyOutcome::AlreadyRan,
            forwarded: 0,
            promoted: 0,
            skipped: 0,
            archival: None,
            old_tasks: Vec::new(),
        }
    }
}

/// Daily migration service over injected stores.
pub struct MigrationService<E, C, K>
where
    E: EntryRepository,
    C: CollectionRepository,
    K: CheckpointStore,
{
    entries: E,
    collections: C,
    checkpoints: K,
    settings: MigrationSettings,
    in_flight: AtomicBool,
}

impl<E, C, K> MigrationService<E, C, K>
where
    E: EntryRepository,
    C: CollectionRepository,
    K: CheckpointStore,
{
    /// Creates a service with default settings.
    pub fn new(entries: E, collections: C, checkpoints: K) -> Self {
        Self::with_settings(entries, collections, checkpoints, MigrationSettings::default())
    }

    pub fn with_settings(
        entries: E,
        collections: C,
        checkpoints: K,
        settings: MigrationSettings,
    ) -> Self {
        Self {
            entries,
            collections,
            checkpoints,
            settings,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Month-end archival service sharing this service's stores.
    pub fn archiver(&self) -> ArchiveService<&E, &C, &K> {
        ArchiveService::new(&self.entries, &self.collections, &self.checkpoints)
    }

    /// Runs the daily migration for `now`'s calendar day.
    ///
    /// # Contract
    /// - Same-day re-entry returns `DailyOutcome::AlreadyRan` without writes.
    /// - On success the checkpoint holds `now`'s day, then archival and
    ///   old-task detection run.
    /// - On failure nothing from this run's batch is visible and the
    ///   checkpoint is unchanged.
    pub fn run_daily_migration(
        &self,
        now: NaiveDateTime,
    ) -> MigrationResult<DailyMigrationReport> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(MigrationError::InProgress)?;
        let started_at = Instant::now();
        let day = now.date();
        info!("event=daily_migration module=migration status=start day={day}");

        let result = self.run_daily_migration_inner(now);
        match &result {
            Ok(report) if report.outcome == DailyOutcome::AlreadyRan => info!(
                "event=daily_migration module=migration status=skip day={} reason=checkpoint",
                day
            ),
            Ok(report) => info!(
                "event=daily_migration module=migration status=ok day={} duration_ms={} forwarded={} promoted={} skipped={} old_tasks={}",
                day,
                started_at.elapsed().as_millis(),
                report.forwarded,
                report.promoted,
                report.skipped,
                report.old_tasks.len()
            ),
            Err(err) => error!(
                "event=daily_migration module=migration status=error day={} duration_ms={} error_code={} error={}",
                day,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    fn run_daily_migration_inner(
        &self,
        now: NaiveDateTime,
    ) -> MigrationResult<DailyMigrationReport> {
        let day = now.date();
        let last_run = self
            .checkpoints
            .last_migration_date()
            .map_err(MigrationError::QueryFailed)?;
        if last_run == Some(day) {
            return Ok(DailyMigrationReport::already_ran(day));
        }

        let mut batch = EntryBatch::new();
        let mut touched = HashSet::new();
        let mut skipped = 0;

        let stale = self.query(&EntryQuery::stale_pending_tasks(start_of_day(now)))?;
        skipped += log_rejected("forward", stale.rejected);
        let mut forwarded = 0;
        for task in stale.entries {
            if !accept("forward", &task, &mut touched, &mut skipped) {
                continue;
            }
            batch.push_transition(forward_task(&task, now));
            forwarded += 1;
        }

        let due = self.query(&EntryQuery::due_future_entries(end_of_day(now)))?;
        skipped += log_rejected("promote", due.rejected);
        let mut promoted = 0;
        for entry in due.entries {
            if !accept("promote", &entry, &mut touched, &mut skipped) {
                continue;
            }
            if let Some(transition) = promote_future_entry(&entry, now) {
                batch.push_transition(transition);
                promoted += 1;
            }
        }

        match self.entries.apply_batch(&batch) {
            Ok(()) => {}
            Err(RepoError::Conflict(id)) => {
                let last_run = self
                    .checkpoints
                    .last_migration_date()
                    .map_err(MigrationError::QueryFailed)?;
                if last_run == Some(day) {
                    warn!(
                        "event=daily_migration module=migration status=skip day={} reason=concurrent_run",
                        day
                    );
                    return Ok(DailyMigrationReport::already_ran(day));
                }
                return Err(MigrationError::SaveFailed(RepoError::Conflict(id)));
            }
            Err(err) => return Err(MigrationError::SaveFailed(err)),
        }
        self.checkpoints
            .set_last_migration_date(day)
            .map_err(MigrationError::SaveFailed)?;

        let archival = if self.settings.archive_enabled {
            Some(self.archiver().run_month_end_archival(now)?)
        } else {
            None
        };
        let old_tasks = self.list_old_tasks(now)?;

        Ok(DailyMigrationReport {
            day,
            outcome: DailyOutcome::Completed,
            forwarded,
            promoted,
            skipped,
            archival,
            old_tasks,
        })
    }

    /// Lists live pending tasks whose first occurrence is at least the
    /// configured number of whole days before `now`'s day. Read-only.
    pub fn list_old_tasks(&self, now: NaiveDateTime) -> MigrationResult<Vec<Entry>> {
        let window = i64::from(self.settings.old_task_threshold_days.max(1)) - 1;
        let cutoff = start_of_day(now) - Duration::days(window);
        let scan = self.query(&EntryQuery::aged_pending_tasks(cutoff))?;
        log_rejected("old_tasks", scan.rejected);
        if !scan.entries.is_empty() {
            info!(
                "event=old_tasks module=migration status=ok count={} threshold_days={}",
                scan.entries.len(),
                self.settings.old_task_threshold_days
            );
        }
        Ok(scan.entries)
    }

    /// Parks the given tasks in the Future Log without a due date.
    ///
    /// Only open, pending, non-archive tasks qualify. Restarts each task's age and strips its forward marker. All tasks are
    /// updated together or not at all.
    pub fn move_to_future_log(&self, ids: &[EntryId]) -> MigrationResult<Vec<Entry>> {
        let tasks = self.load_tasks(ids)?;
        let future_log = CollectionRegistry::new(&self.collections)
            .future_log()
            .map_err(MigrationError::SaveFailed)?;

        let batch = EntryBatch {
            updated: tasks
                .iter()
                .map(|task| defer_to_future_log(task, future_log.id))
                .collect(),
            ..EntryBatch::default()
        };
        self.entries
            .apply_batch(&batch)
            .map_err(MigrationError::SaveFailed)?;
        info!(
            "event=old_task_remediation module=migration status=ok action=defer count={}",
            batch.updated.len()
        );
        Ok(batch.updated)
    }

    /// Moves one task to `to_date`, restarting its age.
    ///
    /// A date after `now`'s day parks the task in the Future Log, due then.
    pub fn reschedule(
        &self,
        id: EntryId,
        to_date: NaiveDateTime,
        now: NaiveDateTime,
    ) -> MigrationResult<Entry> {
        let mut tasks = self.load_tasks(&[id])?;
        let task = tasks.pop().ok_or(MigrationError::EntryNotFound(id))?;
        let future_log = CollectionRegistry::new(&self.collections)
            .future_log()
            .map_err(MigrationError::SaveFailed)?;

        let rescheduled = reschedule_task(&task, to_date, now, future_log.id);
        let batch = EntryBatch {
            updated: vec![rescheduled.clone()],
            ..EntryBatch::default()
        };
        self.entries
            .apply_batch(&batch)
            .map_err(MigrationError::SaveFailed)?;
        info!(
            "event=old_task_remediation module=migration status=ok action=reschedule future={}",
            rescheduled.is_future_entry
        );
        Ok(rescheduled)
    }

    fn load_tasks(&self, ids: &[EntryId]) -> MigrationResult<Vec<Entry>> {
        ids.iter()
            .map(|id| {
                let entry = self
                    .entries
                    .get_entry(*id)
                    .map_err(MigrationError::QueryFailed)?
                    .ok_or(MigrationError::EntryNotFound(*id))?;
                if !entry.is_task() {
                    Err(MigrationError::NotATask(*id))
                } else if entry.has_migrated || entry.archived || !entry.is_pending_task() {
                    Err(MigrationError::NotLiveTask(*id))
                } else {
                    Ok(entry)
                }
            })
            .collect()
    }

    fn query(&self, query: &EntryQuery) -> MigrationResult<EntryScan> {
        self.entries
            .query_entries(query)
            .map_err(MigrationError::QueryFailed)
    }
}

/// Validates one candidate and makes sure no entry is transitioned twice in
/// the same batch.
fn accept(
    step: &str,
    entry: &Entry,
    touched: &mut HashSet<EntryId>,
    skipped: &mut usize,
) -> bool {
    if let Err(err) = entry.validate() {
        log_skipped(step, &err);
        *skipped += 1;
        return false;
    }
    touched.insert(entry.id)
}

pub(crate) fn log_rejected(step: &str, rejected: Vec<EntryValidationError>) -> usize {
    for err in &rejected {
        log_skipped(step, err);
    }
    rejected.len()
}

fn log_skipped(step: &str, err: &EntryValidationError) {
    warn!("event=entry_skipped module=migration status=skip step={step} error={err}");
}

/// Single-flight marker released on drop.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
