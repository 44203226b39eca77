//! Core traits for typed entities and their conversion to and from stored documents.
//!
//! Stored documents are plain [`bson::Document`] values: an ordered, tagged-variant mapping.
//! Typed code works with [`Entity`] implementors and crosses into the document world through
//! [`EntityExt`], which is implemented for every entity.

use bson::{Bson, Document, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Trait for types that can be stored through a [`Repository`](crate::repository::Repository).
///
/// The `_id` field is managed by the repository. Entities that want to see their identifier
/// should map it explicitly, usually as `#[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]`.
///
/// # Example
///
/// ```ignore
/// use docrepo::document::Entity;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
///     pub id: Option<String>,
///     pub name: String,
/// }
///
/// impl Entity for User {
///     fn collection_name() -> Option<&'static str> {
///         Some("users")
///     }
/// }
/// ```
pub trait Entity: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Default collection for this entity type, used when a repository is built without one.
    fn collection_name() -> Option<&'static str> {
        None
    }
}

impl Entity for Document {}

/// Extension trait providing serialization utilities for entities.
///
/// Automatically implemented for every [`Entity`].
pub trait EntityExt: Entity + Sized {
    /// Converts this entity to a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the entity does not serialize to a mapping.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Creates an entity from a stored document.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Converts this entity to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates an entity from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<E: Entity> EntityExt for E {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        serialize_to_document(self).map_err(|e| DocumentStoreError::InvalidDocument(e.to_string()))
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Converts an arbitrary JSON object into a stored document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if `value` is not a JSON object.
pub fn document_from_json(value: &Value) -> DocumentStoreResult<Document> {
    if !value.is_object() {
        return Err(DocumentStoreError::InvalidDocument(
            "expected a JSON object".to_string(),
        ));
    }

    serialize_to_document(value).map_err(|e| DocumentStoreError::InvalidDocument(e.to_string()))
}

/// Converts a stored document into a JSON object.
pub fn document_to_json(document: &Document) -> DocumentStoreResult<Value> {
    Ok(to_value(document)?)
}

/// Renders an identifier value as the string form exposed by the API.
///
/// Strings are returned as-is, object ids as hex and numbers in decimal.
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        other => other.to_string(),
    }
}
