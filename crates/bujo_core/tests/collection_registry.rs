use bujo_core::db::open_db_in_memory;
use bujo_core::{
    Collection, CollectionId, CollectionRegistry, CollectionRepository, CollectionType,
    RepoResult, SqliteCollectionRepository, YearMonth,
};
use std::cell::Cell;

#[test]
fn singleton_buckets_are_created_once() {
    let conn = open_db_in_memory().unwrap();
    let registry = CollectionRegistry::new(SqliteCollectionRepository::try_new(&conn).unwrap());

    let first = registry.future_log().unwrap();
    let second = registry.future_log().unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.name, "Future Log");
    assert!(first.is_automatic);

    let monthly = registry.monthly_log().unwrap();
    assert_eq!(monthly.collection_type, CollectionType::Monthly);
    assert_ne!(monthly.id, first.id);
    assert_eq!(registry.list().unwrap().len(), 2);
}

#[test]
fn month_archive_is_named_by_month_and_parented_under_year() {
    let conn = open_db_in_memory().unwrap();
    let registry = CollectionRegistry::new(SqliteCollectionRepository::try_new(&conn).unwrap());

    let december = YearMonth::new(2024, 12).unwrap();
    let archive = registry.month_archive(december).unwrap();
    assert_eq!(archive.name, "2024/December");
    assert_eq!(archive.collection_type, CollectionType::MonthArchive);
    assert_eq!(archive.sort_order, 12);

    let year = registry.year_bucket(2024).unwrap();
    assert_eq!(year.name, "2024");
    assert_eq!(archive.parent_id, Some(year.id));

    let again = registry.month_archive(december).unwrap();
    assert_eq!(again.id, archive.id);

    let november = registry.month_archive(YearMonth::new(2024, 11).unwrap()).unwrap();
    assert_ne!(november.id, archive.id);
    assert_eq!(november.parent_id, Some(year.id));
    assert_eq!(registry.list().unwrap().len(), 3);
}

#[test]
fn custom_collections_do_not_shadow_system_buckets() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteCollectionRepository::try_new(&conn).unwrap();
    repo.create_collection(&Collection::custom("Future Log")).unwrap();

    let registry = CollectionRegistry::new(&repo);
    let future = registry.future_log().unwrap();
    assert_eq!(future.collection_type, CollectionType::Future);
    assert!(future.is_automatic);
}

/// Stores the collection, then reports failure as if a concurrent writer
/// had won the unique-index race.
struct RacingRepo<'a> {
    inner: SqliteCollectionRepository<'a>,
    creates: Cell<usize>,
}

impl CollectionRepository for RacingRepo<'_> {
    fn get_collection(&self, id: CollectionId) -> RepoResult<Option<Collection>> {
        self.inner.get_collection(id)
    }

    fn find_by_type(&self, collection_type: CollectionType) -> RepoResult<Option<Collection>> {
        self.inner.find_by_type(collection_type)
    }

    fn find_by_name(
        &self,
        collection_type: CollectionType,
        name: &str,
    ) -> RepoResult<Option<Collection>> {
        self.inner.find_by_name(collection_type, name)
    }

    fn create_collection(&self, collection: &Collection) -> RepoResult<()> {
        self.creates.set(self.creates.get() + 1);
        self.inner.create_collection(collection)?;
        self.inner.create_collection(collection)
    }

    fn list_collections(&self) -> RepoResult<Vec<Collection>> {
        self.inner.list_collections()
    }
}

#[test]
fn lost_creation_race_resolves_to_existing_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = RacingRepo {
        inner: SqliteCollectionRepository::try_new(&conn).unwrap(),
        creates: Cell::new(0),
    };
    let registry = CollectionRegistry::new(&repo);

    let future = registry.future_log().unwrap();
    assert_eq!(repo.creates.get(), 1);
    assert_eq!(future.collection_type, CollectionType::Future);
    assert_eq!(repo.list_collections().unwrap().len(), 1);
}
