//! Storage engine boundary.
//!
//! The data-access layer consumes a store only through [`DataStore`]; it makes
//! no assumption about the storage technology behind it.
//!
//! ## Commit semantics
//!
//! `commit()` receives every pending change of a session as one
//! [`ChangeBatch`] and must apply it atomically: either every change lands
//! or none does. Implementations report the number of persisted changes.

pub mod dialect;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use tessera_core::{EntitySet, Key, KeyValue, Row, StoreError};

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// What a pending change does to its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Insert(Row),
    /// `properties` lists the columns to write; empty means the whole row.
    Update {
        row: Row,
        properties: BTreeSet<String>,
    },
    Delete,
}

/// One pending change addressed by set and primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub set: EntitySet,
    pub key: Key,
    pub kind: ChangeKind,
}

/// Every pending change of a session, in tracking order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub changes: Vec<RowChange>,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Storage engine capability.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    /// Look up one row by primary key.
    async fn find(&self, set: &EntitySet, key: &Key) -> Result<Option<Row>, StoreError>;

    /// Existence probe; implementations should avoid materializing the row.
    async fn exists(&self, set: &EntitySet, key: &Key) -> Result<bool, StoreError> {
        Ok(self.find(set, key).await?.is_some())
    }

    /// Rows of `set` whose columns equal the given values (all rows when
    /// `filters` is empty).
    async fn select_where(
        &self,
        set: &str,
        filters: &[(&str, KeyValue)],
    ) -> Result<Vec<Row>, StoreError>;

    /// Rows produced by backend-specific raw query text with positional
    /// parameters.
    async fn select_sql(&self, sql: &str, params: &[KeyValue]) -> Result<Vec<Row>, StoreError>;

    /// One column of one row; `None` when the row does not exist.
    async fn load_property(
        &self,
        set: &EntitySet,
        key: &Key,
        property: &str,
    ) -> Result<Option<JsonValue>, StoreError> {
        Ok(self
            .find(set, key)
            .await?
            .map(|mut row| row.remove(property).unwrap_or(JsonValue::Null)))
    }

    /// Apply the whole batch atomically; returns the number of persisted changes.
    async fn commit(&self, batch: ChangeBatch) -> Result<usize, StoreError>;
}
