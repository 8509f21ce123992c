//! Primary-key tuples.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{DataError, DataResult};

/// One component of a primary key, or a positional raw-query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(v) => JsonValue::from(*v),
            Self::Str(v) => JsonValue::from(v.as_str()),
        }
    }

    /// Read a key component out of a stored row value.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self::Str(s.clone())),
            JsonValue::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }

    /// Whether a row value holds this key component.
    pub fn matches(&self, value: &JsonValue) -> bool {
        Self::from_json(value).as_ref() == Some(self)
    }
}

impl core::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for KeyValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        Self::Str(value.to_string())
    }
}

/// Ordered primary-key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<KeyValue>);

impl Key {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract the key named by `columns` from a stored row.
    pub fn from_row(row: &crate::Row, columns: &[&str]) -> DataResult<Self> {
        columns
            .iter()
            .map(|column| {
                row.get(*column)
                    .and_then(KeyValue::from_json)
                    .ok_or_else(|| {
                        DataError::invalid_data(format!("key column '{column}' missing or not a key value"))
                    })
            })
            .collect::<DataResult<Vec<_>>>()
            .map(Self)
    }

    /// Whether `row` holds this key in `columns`.
    pub fn matches_row(&self, row: &crate::Row, columns: &[&str]) -> bool {
        self.0.len() == columns.len()
            && self
                .0
                .iter()
                .zip(columns)
                .all(|(value, column)| row.get(*column).is_some_and(|v| value.matches(v)))
    }
}

impl core::fmt::Display for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("(")?;
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

impl<V: Into<KeyValue>> From<V> for Key {
    fn from(value: V) -> Self {
        Self(vec![value.into()])
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

impl From<&[KeyValue]> for Key {
    fn from(values: &[KeyValue]) -> Self {
        Self(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_read_from_row_columns() {
        let row = json!({"order_id": 10248, "product_id": 11, "quantity": 12});
        let row = row.as_object().unwrap();

        let key = Key::from_row(row, &["order_id", "product_id"]).unwrap();
        assert_eq!(key, Key::new(vec![KeyValue::Int(10248), KeyValue::Int(11)]));
        assert!(key.matches_row(row, &["order_id", "product_id"]));
        assert_eq!(key.to_string(), "(10248, 11)");
    }

    #[test]
    fn missing_key_column_is_invalid_data() {
        let row = json!({"company_name": "Alfreds Futterkiste"});
        let err = Key::from_row(row.as_object().unwrap(), &["customer_id"]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
    }

    #[test]
    fn single_value_converts_to_key() {
        let key: Key = "ALFKI".into();
        assert_eq!(key.values(), &[KeyValue::Str("ALFKI".into())]);
    }
}
