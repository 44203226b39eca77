//! Store configuration.
//!
//! A [`StoreConfig`] carries the database address and the default database name a backend is
//! built from. It can be deserialized from any serde source, parsed from JSON, or read from the
//! environment.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Environment variable holding the connection string.
pub const CONNECTION_STRING_VAR: &str = "DOCREPO_CONNECTION_STRING";
/// Environment variable holding the default database name.
pub const DATABASE_VAR: &str = "DOCREPO_DATABASE";

/// Connection settings for a document store backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Address of the database, e.g. `mongodb://localhost:27017`.
    pub connection_string: String,
    /// Database every collection is resolved against.
    pub database: String,
}

impl StoreConfig {
    pub fn new(connection_string: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database: database.into(),
        }
    }

    /// Parses a configuration from a JSON object with `connectionString` and `database` keys.
    pub fn from_json(input: &str) -> DocumentStoreResult<Self> {
        let config: StoreConfig = serde_json::from_str(input)
            .map_err(|e| DocumentStoreError::Configuration(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Reads the configuration from `DOCREPO_CONNECTION_STRING` and `DOCREPO_DATABASE`.
    pub fn from_env() -> DocumentStoreResult<Self> {
        let read = |name: &str| {
            env::var(name).map_err(|_| {
                DocumentStoreError::Configuration(format!("environment variable {name} is not set"))
            })
        };

        let config = Self::new(read(CONNECTION_STRING_VAR)?, read(DATABASE_VAR)?);
        config.validate()?;

        Ok(config)
    }

    /// Checks that both settings are present.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.connection_string.trim().is_empty() {
            return Err(DocumentStoreError::Configuration(
                "connection string must not be empty".to_string(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(DocumentStoreError::Configuration(
                "database name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_configuration() {
        let config = StoreConfig::from_json(
            r#"{ "connectionString": "mongodb://localhost:27017", "database": "app" }"#,
        )
        .unwrap();

        assert_eq!(config, StoreConfig::new("mongodb://localhost:27017", "app"));
    }

    #[test]
    fn rejects_empty_database() {
        let result = StoreConfig::from_json(r#"{ "connectionString": "mongodb://x", "database": " " }"#);

        assert!(matches!(result, Err(DocumentStoreError::Configuration(_))));
    }

    #[test]
    fn rejects_missing_keys() {
        assert!(StoreConfig::from_json(r#"{ "database": "app" }"#).is_err());
    }
}
