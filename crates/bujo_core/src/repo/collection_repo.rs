//! Collection repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Singleton types are looked up by type, dated buckets by exact name.
//! - Unique indexes back the registry's one-bucket-per-key invariant.

use crate::model::collection::{Collection, CollectionId, CollectionType};
use crate::repo::{bool_to_int, ensure_migrated, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const COLLECTION_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    collection_type,
    is_automatic,
    sort_order,
    parent_uuid
FROM collections";

/// Repository interface for collection lookup and creation.
pub trait CollectionRepository {
    fn get_collection(&self, id: CollectionId) -> RepoResult<Option<Collection>>;
    /// First collection of the given type, by `sort_order` then name.
    fn find_by_type(&self, collection_type: CollectionType) -> RepoResult<Option<Collection>>;
    fn find_by_name(
        &self,
        collection_type: CollectionType,
        name: &str,
    ) -> RepoResult<Option<Collection>>;
    fn create_collection(&self, collection: &Collection) -> RepoResult<()>;
    /// All collections ordered by type, `sort_order`, name.
    fn list_collections(&self) -> RepoResult<Vec<Collection>>;
}

impl<R: CollectionRepository + ?Sized> CollectionRepository for &R {
    fn get_collection(&self, id: CollectionId) -> RepoResult<Option<Collection>> {
        (**self).get_collection(id)
    }

    fn find_by_type(&self, collection_type: CollectionType) -> RepoResult<Option<Collection>> {
        (**self).find_by_type(collection_type)
    }

    fn find_by_name(
        &self,
        collection_type: CollectionType,
        name: &str,
    ) -> RepoResult<Option<Collection>> {
        (**self).find_by_name(collection_type, name)
    }

    fn create_collection(&self, collection: &Collection) -> RepoResult<()> {
        (**self).create_collection(collection)
    }

    fn list_collections(&self) -> RepoResult<Vec<Collection>> {
        (**self).list_collections()
    }
}

/// SQLite-backed collection repository.
pub struct SqliteCollectionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCollectionRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self { conn })
    }
}

impl CollectionRepository for SqliteCollectionRepository<'_> {
    fn get_collection(&self, id: CollectionId) -> RepoResult<Option<Collection>> {
        self.conn
            .query_row(
                &format!("{COLLECTION_SELECT_SQL} WHERE uuid = ?1;"),
                [id.to_string()],
                read_collection_row,
            )
            .optional()?
            .map(RawCollectionRow::into_collection)
            .transpose()
    }

    fn find_by_type(&self, collection_type: CollectionType) -> RepoResult<Option<Collection>> {
        self.conn
            .query_row(
                &format!(
                    "{COLLECTION_SELECT_SQL}
                     WHERE collection_type = ?1
                     ORDER BY sort_order ASC, name ASC
                     LIMIT 1;"
                ),
                [collection_type_to_db(collection_type)],
                read_collection_row,
            )
            .optional()?
            .map(RawCollectionRow::into_collection)
            .transpose()
    }

    fn find_by_name(
        &self,
        collection_type: CollectionType,
        name: &str,
    ) -> RepoResult<Option<Collection>> {
        self.conn
            .query_row(
                &format!("{COLLECTION_SELECT_SQL} WHERE collection_type = ?1 AND name = ?2;"),
                params![collection_type_to_db(collection_type), name],
                read_collection_row,
            )
            .optional()?
            .map(RawCollectionRow::into_collection)
            .transpose()
    }

    fn create_collection(&self, collection: &Collection) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO collections (
                uuid,
                name,
                collection_type,
                is_automatic,
                sort_order,
                parent_uuid
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                collection.id.to_string(),
                collection.name.as_str(),
                collection_type_to_db(collection.collection_type),
                bool_to_int(collection.is_automatic),
                collection.sort_order,
                collection.parent_id.map(|id| id.to_string()),
            ],
        )?;
        Ok(())
    }

    fn list_collections(&self) -> RepoResult<Vec<Collection>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COLLECTION_SELECT_SQL} ORDER BY collection_type ASC, sort_order ASC, name ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut collections = Vec::new();
        while let Some(row) = rows.next()? {
            collections.push(read_collection_row(row)?.into_collection()?);
        }
        Ok(collections)
    }
}

struct RawCollectionRow {
    uuid: String,
    name: String,
    collection_type: String,
    is_automatic: i64,
    sort_order: i64,
    parent_uuid: Option<String>,
}

fn read_collection_row(row: &Row<'_>) -> rusqlite::Result<RawCollectionRow> {
    Ok(RawCollectionRow {
        uuid: row.get("uuid")?,
        name: row.get("name")?,
        collection_type: row.get("collection_type")?,
        is_automatic: row.get("is_automatic")?,
        sort_order: row.get("sort_order")?,
        parent_uuid: row.get("parent_uuid")?,
    })
}

impl RawCollectionRow {
    fn into_collection(self) -> RepoResult<Collection> {
        let id = parse_uuid(&self.uuid, "collections.uuid")?;
        let collection_type = parse_collection_type(&self.collection_type).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid collection type `{}` in collections.collection_type",
                self.collection_type
            ))
        })?;
        let parent_id = match self.parent_uuid {
            Some(value) => Some(parse_uuid(&value, "collections.parent_uuid")?),
            None => None,
        };
        Ok(Collection {
            id,
            name: self.name,
            collection_type,
            is_automatic: self.is_automatic == 1,
            sort_order: self.sort_order,
            parent_id,
        })
    }
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn collection_type_to_db(collection_type: CollectionType) -> &'static str {
    match collection_type {
        CollectionType::Future => "future",
        CollectionType::Monthly => "monthly",
        CollectionType::Year => "year",
        CollectionType::MonthArchive => "month_archive",
        CollectionType::Custom => "custom",
    }
}

fn parse_collection_type(value: &str) -> Option<CollectionType> {
    match value {
        "future" => Some(CollectionType::Future),
        "monthly" => Some(CollectionType::Monthly),
        "year" => Some(CollectionType::Year),
        "month_archive" => Some(CollectionType::MonthArchive),
        "custom" => Some(CollectionType::Custom),
        _ => None,
    }
}
