//! Entity traits: persisted shape + tracking metadata.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{DataError, DataResult};
use crate::key::Key;
use crate::tracking::{Tracking, TrackingState};

/// Storage-side representation of one entity: column name → value.
pub type Row = serde_json::Map<String, JsonValue>;

/// Static description of an entity's extent in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntitySet {
    /// Set (table/collection) name.
    pub name: &'static str,
    /// Primary-key column names, in key-tuple order.
    pub key: &'static [&'static str],
}

impl EntitySet {
    pub const fn new(name: &'static str, key: &'static [&'static str]) -> Self {
        Self { name, key }
    }

    pub fn is_key_column(&self, column: &str) -> bool {
        self.key.contains(&column)
    }
}

/// Shape of a navigation relationship.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NavigationKind {
    /// This entity holds the foreign key; loads at most one principal row.
    Reference,
    /// The target holds the foreign key; loads every dependent row.
    Collection,
}

/// Navigation relationship declared on an entity.
///
/// `local` and `remote` are column lists of equal length, matched
/// pairwise: rows of `target` whose `remote` columns equal this entity's
/// `local` columns are related.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Property that receives the related value(s).
    pub name: &'static str,
    pub target: &'static str,
    pub kind: NavigationKind,
    pub local: &'static [&'static str],
    pub remote: &'static [&'static str],
}

/// Any value carrying a tracking handle.
pub trait Trackable {
    fn tracking(&self) -> &Tracking;

    fn tracking_mut(&mut self) -> &mut Tracking;

    fn tracking_state(&self) -> TrackingState {
        self.tracking().state()
    }
}

/// Persisted entity shape.
///
/// Rows are produced through serde; the tracking handle must be excluded from
/// serialization (`#[serde(skip)]`) and navigation properties must default
/// when absent (`#[serde(default)]`).
pub trait Entity: Trackable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const SET: EntitySet;

    /// Navigation relationships, materialized by `load_related_entities`.
    fn navigations() -> &'static [Navigation] {
        &[]
    }

    /// Full serialized form, navigation properties included.
    fn to_row(&self) -> DataResult<Row> {
        match serde_json::to_value(self)? {
            JsonValue::Object(row) => Ok(row),
            other => Err(DataError::invalid_data(format!(
                "{} must serialize to an object, got {other}",
                Self::SET.name
            ))),
        }
    }

    /// Row as persisted: navigation properties stripped.
    fn to_store_row(&self) -> DataResult<Row> {
        let mut row = self.to_row()?;
        for navigation in Self::navigations() {
            row.remove(navigation.name);
        }
        Ok(row)
    }

    /// Build a detached entity from a row.
    fn from_row(row: Row) -> DataResult<Self> {
        Ok(serde_json::from_value(JsonValue::Object(row))?)
    }

    fn key(&self) -> DataResult<Key> {
        Key::from_row(&self.to_row()?, Self::SET.key)
    }

    /// Overwrite one property from a stored value, keeping the tracking handle.
    fn set_property(&mut self, name: &str, value: JsonValue) -> DataResult<()> {
        let mut row = self.to_row()?;
        row.insert(name.to_string(), value);
        let mut updated = Self::from_row(row)?;
        *updated.tracking_mut() = self.tracking().clone();
        *self = updated;
        Ok(())
    }

    fn navigation(name: &str) -> Option<&'static Navigation> {
        Self::navigations().iter().find(|n| n.name == name)
    }
}
