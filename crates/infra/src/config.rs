//! Store configuration.

use serde::{Deserialize, Serialize};

use tessera_core::{DataError, DataResult};

pub const DATABASE_URL_VAR: &str = "TESSERA_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "TESSERA_MAX_CONNECTIONS";

/// Connection settings for a persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `None` means no persistent store is configured.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
        }
    }
}

impl StoreConfig {
    /// Read `TESSERA_DATABASE_URL` and `TESSERA_MAX_CONNECTIONS`.
    pub fn from_env() -> DataResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DataResult<Self> {
        let mut config = Self::default();
        config.database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());
        if let Some(raw) = lookup(MAX_CONNECTIONS_VAR) {
            config.max_connections = raw
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    DataError::configuration(format!(
                        "{MAX_CONNECTIONS_VAR} must be a positive integer, got '{raw}'"
                    ))
                })?;
        }
        Ok(config)
    }
}
