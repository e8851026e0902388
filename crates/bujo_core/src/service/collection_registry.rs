//! Find-or-create registry for system-managed collections.
//!
//! # Responsibility
//! - Resolve the Future Log, Monthly Log, year and month-archive buckets.
//! - Create missing buckets as automatic collections.
//!
//! # Invariants
//! - Singleton types resolve by type; dated buckets by exact name.
//! - A lost creation race resolves to the row the other writer created.

use crate::model::calendar::YearMonth;
use crate::model::collection::{Collection, CollectionId, CollectionType};
use crate::repo::collection_repo::CollectionRepository;
use crate::repo::RepoResult;
use log::{info, warn};

const FUTURE_LOG_NAME: &str = "Future Log";
const MONTHLY_LOG_NAME: &str = "Monthly Log";

/// Registry over a collection repository.
pub struct CollectionRegistry<R: CollectionRepository> {
    repo: R,
}

impl<R: CollectionRepository> CollectionRegistry<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the bucket keyed by type (singletons) or name, creating it
    /// with `is_automatic = true` when absent.
    pub fn get_or_create(
        &self,
        collection_type: CollectionType,
        name: &str,
        sort_order: i64,
    ) -> RepoResult<Collection> {
        self.get_or_create_under(collection_type, name, sort_order, None)
    }

    pub fn future_log(&self) -> RepoResult<Collection> {
        self.get_or_create(CollectionType::Future, FUTURE_LOG_NAME, 0)
    }

    pub fn monthly_log(&self) -> RepoResult<Collection> {
        self.get_or_create(CollectionType::Monthly, MONTHLY_LOG_NAME, 0)
    }

    /// Bucket named `{year}`.
    pub fn year_bucket(&self, year: i32) -> RepoResult<Collection> {
        self.get_or_create(CollectionType::Year, &year.to_string(), i64::from(year))
    }

    /// Bucket named `{year}/{MonthName}`, parented under its year bucket.
    pub fn month_archive(&self, month: YearMonth) -> RepoResult<Collection> {
        let year = self.year_bucket(month.year())?;
        self.get_or_create_under(
            CollectionType::MonthArchive,
            &month.archive_name(),
            i64::from(month.month()),
            Some(year.id),
        )
    }

    /// All known collections.
    pub fn list(&self) -> RepoResult<Vec<Collection>> {
        self.repo.list_collections()
    }

    fn get_or_create_under(
        &self,
        collection_type: CollectionType,
        name: &str,
        sort_order: i64,
        parent_id: Option<CollectionId>,
    ) -> RepoResult<Collection> {
        if let Some(existing) = self.lookup(collection_type, name)? {
            return Ok(existing);
        }

        let mut collection = Collection::automatic(collection_type, name, sort_order);
        collection.parent_id = parent_id;
        match self.repo.create_collection(&collection) {
            Ok(()) => {
                info!(
                    "event=collection_create module=registry status=ok type={:?} sort_order={}",
                    collection_type, sort_order
                );
                Ok(collection)
            }
            Err(err) => match self.lookup(collection_type, name)? {
                Some(existing) => {
                    warn!(
                        "event=collection_create module=registry status=race type={:?} error={}",
                        collection_type, err
                    );
                    Ok(existing)
                }
                None => Err(err),
            },
        }
    }

    fn lookup(
        &self,
        collection_type: CollectionType,
        name: &str,
    ) -> RepoResult<Option<Collection>> {
        if collection_type.is_singleton() {
            self.repo.find_by_type(collection_type)
        } else {
            self.repo.find_by_name(collection_type, name)
        }
    }
}
