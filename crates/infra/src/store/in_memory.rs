use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_core::{Entity, EntitySet, Key, KeyValue, Row, StoreError};

use super::dialect;
use super::{ChangeBatch, ChangeKind, DataStore};

type Sets = HashMap<String, BTreeMap<Key, Row>>;

/// In-memory store.
///
/// Intended for tests/dev. Commits are staged on a copy of the touched sets
/// and swapped in only when every change of the batch applied cleanly.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sets: RwLock<Sets>,
    commits: AtomicUsize,
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows directly, bypassing change tracking.
    pub fn seed(
        &self,
        set: &EntitySet,
        rows: impl IntoIterator<Item = Row>,
    ) -> Result<(), StoreError> {
        let mut sets = self.sets.write().map_err(|_| poisoned())?;
        let table = sets.entry(set.name.to_string()).or_default();
        for row in rows {
            let key = Key::from_row(&row, set.key)
                .map_err(|e| StoreError::Constraint(e.to_string()))?;
            table.insert(key, row);
        }
        Ok(())
    }

    pub fn seed_entities<E: Entity>(&self, entities: &[E]) -> Result<(), StoreError> {
        let rows = entities
            .iter()
            .map(|e| e.to_store_row())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        self.seed(&E::SET, rows)
    }

    pub fn row_count(&self, set: &str) -> Result<usize, StoreError> {
        let sets = self.sets.read().map_err(|_| poisoned())?;
        Ok(sets.get(set).map(BTreeMap::len).unwrap_or(0))
    }

    /// Number of commits that reached the store.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn rows(&self, set: &str, mut keep: impl FnMut(&Row) -> bool) -> Result<Vec<Row>, StoreError> {
        let sets = self.sets.read().map_err(|_| poisoned())?;
        Ok(sets
            .get(set)
            .map(|table| table.values().filter(|row| keep(row)).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl DataStore for InMemoryStore {
    async fn find(&self, set: &EntitySet, key: &Key) -> Result<Option<Row>, StoreError> {
        let sets = self.sets.read().map_err(|_| poisoned())?;
        Ok(sets.get(set.name).and_then(|table| table.get(key)).cloned())
    }

    async fn select_where(
        &self,
        set: &str,
        filters: &[(&str, KeyValue)],
    ) -> Result<Vec<Row>, StoreError> {
        self.rows(set, |row| {
            filters
                .iter()
                .all(|(column, value)| row.get(*column).is_some_and(|v| value.matches(v)))
        })
    }

    async fn select_sql(&self, sql: &str, params: &[KeyValue]) -> Result<Vec<Row>, StoreError> {
        let statement = dialect::parse(sql, params)?;
        self.rows(&statement.set, |row| statement.matches(row))
    }

    async fn commit(&self, batch: ChangeBatch) -> Result<usize, StoreError> {
        let mut sets = self.sets.write().map_err(|_| poisoned())?;
        self.commits.fetch_add(1, Ordering::SeqCst);

        let mut staged: Sets = HashMap::new();
        for change in &batch.changes {
            let name = change.set.name;
            if !staged.contains_key(name) {
                staged.insert(name.to_string(), sets.get(name).cloned().unwrap_or_default());
            }
            let Some(table) = staged.get_mut(name) else {
                continue;
            };

            match &change.kind {
                ChangeKind::Insert(row) => {
                    if table.contains_key(&change.key) {
                        return Err(StoreError::Constraint(format!(
                            "{name} {} already exists",
                            change.key
                        )));
                    }
                    table.insert(change.key.clone(), row.clone());
                }
                ChangeKind::Update { row, properties } => {
                    let existing = table.get_mut(&change.key).ok_or_else(|| {
                        StoreError::Concurrency(format!("{name} {} no longer exists", change.key))
                    })?;
                    if properties.is_empty() {
                        *existing = row.clone();
                    } else {
                        for property in properties {
                            match row.get(property) {
                                Some(value) => existing.insert(property.clone(), value.clone()),
                                None => existing.remove(property),
                            };
                        }
                    }
                }
                ChangeKind::Delete => {
                    if table.remove(&change.key).is_none() {
                        return Err(StoreError::Concurrency(format!(
                            "{name} {} no longer exists",
                            change.key
                        )));
                    }
                }
            }
        }

        sets.extend(staged);
        tracing::debug!(changes = batch.len(), "in-memory batch committed");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::RowChange;
    use serde_json::json;
    use std::collections::BTreeSet;

    const CUSTOMERS: EntitySet = EntitySet::new("customers", &["customer_id"]);

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .seed(
                &CUSTOMERS,
                [
                    row(json!({"customer_id": "ALFKI", "company_name": "Alfreds Futterkiste", "city": "Berlin"})),
                    row(json!({"customer_id": "BERGS", "company_name": "Berglunds snabbköp", "city": "Luleå"})),
                ],
            )
            .unwrap();
        store
    }

    fn change(key: &str, kind: ChangeKind) -> RowChange {
        RowChange {
            set: CUSTOMERS,
            key: Key::from(key),
            kind,
        }
    }

    #[tokio::test]
    async fn find_and_filter() {
        let store = store();
        let alfki = store.find(&CUSTOMERS, &Key::from("ALFKI")).await.unwrap().unwrap();
        assert_eq!(alfki["city"], json!("Berlin"));
        assert!(store.find(&CUSTOMERS, &Key::from("NOPE")).await.unwrap().is_none());
        assert!(store.exists(&CUSTOMERS, &Key::from("BERGS")).await.unwrap());

        let rows = store
            .select_where("customers", &[("city", KeyValue::from("Luleå"))])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store.select_where("orders", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn raw_queries_use_the_dialect() {
        let store = store();
        let rows = store
            .select_sql("SELECT * FROM customers WHERE company_name LIKE $1", &["%Futterkiste".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let err = store.select_sql("SELECT name FROM customers", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn update_writes_only_listed_properties() {
        let store = store();
        store
            .commit(ChangeBatch {
                changes: vec![change(
                    "ALFKI",
                    ChangeKind::Update {
                        row: row(json!({"customer_id": "ALFKI", "company_name": "Alfreds", "city": "Hamburg"})),
                        properties: BTreeSet::from(["company_name".to_string()]),
                    },
                )],
            })
            .await
            .unwrap();

        let alfki = store.find(&CUSTOMERS, &Key::from("ALFKI")).await.unwrap().unwrap();
        assert_eq!(alfki["company_name"], json!("Alfreds"));
        assert_eq!(alfki["city"], json!("Berlin"));
    }

    #[tokio::test]
    async fn failing_batch_leaves_store_untouched() {
        let store = store();
        let batch = ChangeBatch {
            changes: vec![
                change("COMP1", ChangeKind::Insert(row(json!({"customer_id": "COMP1"})))),
                change("ALFKI", ChangeKind::Delete),
                change("ALFKI", ChangeKind::Delete),
            ],
        };

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(store.row_count("customers").unwrap(), 2);
        assert!(store.exists(&CUSTOMERS, &Key::from("ALFKI")).await.unwrap());
        assert!(!store.exists(&CUSTOMERS, &Key::from("COMP1")).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_constraint_violation() {
        let store = store();
        let err = store
            .commit(ChangeBatch {
                changes: vec![change("BERGS", ChangeKind::Insert(row(json!({"customer_id": "BERGS"}))))],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(store.commit_count(), 1);
    }
}
