//! Resolved collection references.

use std::fmt;

use crate::{connection::validate_collection, error::DocumentStoreResult};

/// A validated binding to one collection of one database.
///
/// A [`Repository`](crate::repository::Repository) resolves its reference once, on first use,
/// and reuses it until it is disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    database: String,
    name: String,
}

impl CollectionRef {
    /// Validates `name` and binds it to `database`.
    pub(crate) fn resolve(database: &str, name: &str) -> DocumentStoreResult<Self> {
        validate_collection(name)?;

        Ok(Self {
            database: database.to_string(),
            name: name.to_string(),
        })
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the database the collection belongs to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns `database.collection`.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentStoreError;

    #[test]
    fn resolves_named_collection() {
        let users = CollectionRef::resolve("app", "users").unwrap();

        assert_eq!(users.name(), "users");
        assert_eq!(users.namespace(), "app.users");
        assert_eq!(users.to_string(), "app.users");
    }

    #[test]
    fn rejects_blank_names() {
        assert!(matches!(
            CollectionRef::resolve("app", "  "),
            Err(DocumentStoreError::Validation(_))
        ));
    }
}
