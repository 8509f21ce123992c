//! Postgres-backed store implementation.
//!
//! Rows travel as JSON objects: reads go through `row_to_json`, writes through
//! `json_populate_record`, so no per-entity SQL has to be generated beyond
//! column lists.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | Other | N/A | `Backend` |
//!
//! An update or delete that touches no row is reported as `Concurrency`.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::instrument;

use tessera_core::{EntitySet, Key, KeyValue, Row, StoreError};

use super::{ChangeBatch, ChangeKind, DataStore};
use crate::config::StoreConfig;

/// Postgres-backed store.
///
/// Each commit runs in one transaction; a failing statement rolls back the
/// whole batch.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("database_url is not configured".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        tracing::info!(max_connections = config.max_connections, "postgres store connected");
        Ok(Self::new(pool))
    }
}

/// Quote a set or column name; anything but `[A-Za-z_][A-Za-z0-9_]*` is rejected.
fn ident(name: &str) -> Result<String, StoreError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidQuery(format!("invalid identifier '{name}'")))
    }
}

/// `"a"::text = $n AND ...`, numbering from `first`. Values bind as text.
fn equality_clause(columns: &[&str], first: usize) -> Result<String, StoreError> {
    let terms = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| Ok(format!("{}::text = ${}", ident(column)?, first + idx)))
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(if terms.is_empty() {
        "TRUE".to_string()
    } else {
        terms.join(" AND ")
    })
}

fn object(value: JsonValue) -> Result<Row, StoreError> {
    match value {
        JsonValue::Object(row) => Ok(row),
        other => Err(StoreError::Backend(format!("expected a row object, got {other}"))),
    }
}

#[async_trait::async_trait]
impl DataStore for PgStore {
    #[instrument(skip(self), fields(set = set.name, key = %key), err)]
    async fn find(&self, set: &EntitySet, key: &Key) -> Result<Option<Row>, StoreError> {
        let sql = format!(
            "SELECT row_to_json(t) FROM {} t WHERE {} LIMIT 1",
            ident(set.name)?,
            equality_clause(set.key, 1)?
        );
        let mut query = sqlx::query_scalar::<_, JsonValue>(&sql);
        for value in key.values() {
            query = query.bind(value.to_string());
        }
        query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find", e))?
            .map(object)
            .transpose()
    }

    async fn exists(&self, set: &EntitySet, key: &Key) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {})",
            ident(set.name)?,
            equality_clause(set.key, 1)?
        );
        let mut query = sqlx::query_scalar::<_, bool>(&sql);
        for value in key.values() {
            query = query.bind(value.to_string());
        }
        query
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists", e))
    }

    async fn select_where(
        &self,
        set: &str,
        filters: &[(&str, KeyValue)],
    ) -> Result<Vec<Row>, StoreError> {
        let columns: Vec<&str> = filters.iter().map(|(column, _)| *column).collect();
        let sql = format!(
            "SELECT row_to_json(t) FROM {} t WHERE {}",
            ident(set)?,
            equality_clause(&columns, 1)?
        );
        let mut query = sqlx::query_scalar::<_, JsonValue>(&sql);
        for (_, value) in filters {
            query = query.bind(value.to_string());
        }
        query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_where", e))?
            .into_iter()
            .map(object)
            .collect()
    }

    async fn select_sql(&self, sql: &str, params: &[KeyValue]) -> Result<Vec<Row>, StoreError> {
        let wrapped = format!("SELECT row_to_json(q) FROM ({sql}) q");
        let mut query = sqlx::query_scalar::<_, JsonValue>(&wrapped);
        for param in params {
            query = match param {
                KeyValue::Int(v) => query.bind(*v),
                KeyValue::Str(v) => query.bind(v.clone()),
            };
        }
        query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_sql", e))?
            .into_iter()
            .map(object)
            .collect()
    }

    #[instrument(skip(self, batch), fields(changes = batch.len()), err)]
    async fn commit(&self, batch: ChangeBatch) -> Result<usize, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for change in &batch.changes {
            let table = ident(change.set.name)?;
            let affected = match &change.kind {
                ChangeKind::Insert(row) => {
                    let sql = format!(
                        "INSERT INTO {table} SELECT * FROM json_populate_record(NULL::{table}, $1)"
                    );
                    sqlx::query(&sql)
                        .bind(Json(JsonValue::Object(row.clone())))
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("insert", e))?
                        .rows_affected()
                }
                ChangeKind::Update { row, properties } => {
                    let columns: Vec<&str> = if properties.is_empty() {
                        row.keys()
                            .map(String::as_str)
                            .filter(|column| !change.set.is_key_column(column))
                            .collect()
                    } else {
                        properties.iter().map(String::as_str).collect()
                    };
                    if columns.is_empty() {
                        continue;
                    }
                    let quoted = columns
                        .iter()
                        .map(|column| ident(column))
                        .collect::<Result<Vec<_>, _>>()?
                        .join(", ");
                    let sql = format!(
                        "UPDATE {table} SET ({quoted}) = (SELECT {quoted} FROM json_populate_record(NULL::{table}, $1)) WHERE {}",
                        equality_clause(change.set.key, 2)?
                    );
                    let mut query = sqlx::query(&sql).bind(Json(JsonValue::Object(row.clone())));
                    for value in change.key.values() {
                        query = query.bind(value.to_string());
                    }
                    query
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("update", e))?
                        .rows_affected()
                }
                ChangeKind::Delete => {
                    let sql = format!(
                        "DELETE FROM {table} WHERE {}",
                        equality_clause(change.set.key, 1)?
                    );
                    let mut query = sqlx::query(&sql);
                    for value in change.key.values() {
                        query = query.bind(value.to_string());
                    }
                    query
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("delete", e))?
                        .rows_affected()
                }
            };

            if affected == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::Concurrency(format!(
                    "{} {} no longer exists",
                    change.set.name, change.key
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(batch.len())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505" | "23503" | "23514") => StoreError::Constraint(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_or_rejected() {
        assert_eq!(ident("customers").unwrap(), "\"customers\"");
        assert!(ident("customers; DROP TABLE orders").is_err());
        assert!(ident("1st").is_err());
    }

    #[test]
    fn equality_clause_numbers_parameters() {
        assert_eq!(
            equality_clause(&["order_id", "product_id"], 2).unwrap(),
            "\"order_id\"::text = $2 AND \"product_id\"::text = $3"
        );
        assert_eq!(equality_clause(&[], 1).unwrap(), "TRUE");
    }
}
