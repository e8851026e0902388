//! Collection (bucket) domain model.
//!
//! # Invariants
//! - Exactly one `Future` and one `Monthly` collection exist.
//! - At most one `Year` collection per year and one `MonthArchive` per
//!   (year, month); both are identified by exact name.
//! - System-managed buckets carry `is_automatic = true`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CollectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    /// Singleton Future Log.
    Future,
    /// Singleton Monthly Log.
    Monthly,
    /// One per year, named `{year}`.
    Year,
    /// One per (year, month), named `{year}/{MonthName}`.
    MonthArchive,
    /// User-created bucket.
    Custom,
}

impl CollectionType {
    /// Whether lookup is by type alone rather than by name.
    pub fn is_singleton(self) -> bool {
        matches!(self, Self::Future | Self::Monthly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub collection_type: CollectionType,
    pub is_automatic: bool,
    /// Year for year buckets, month number for archives, 0 otherwise.
    pub sort_order: i64,
    /// Year bucket owning a month archive.
    pub parent_id: Option<CollectionId>,
}

impl Collection {
    /// Creates a system-managed bucket.
    pub fn automatic(
        collection_type: CollectionType,
        name: impl Into<String>,
        sort_order: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            collection_type,
            is_automatic: true,
            sort_order,
            parent_id: None,
        }
    }

    /// Creates a user bucket.
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            collection_type: CollectionType::Custom,
            is_automatic: false,
            sort_order: 0,
            parent_id: None,
        }
    }
}
