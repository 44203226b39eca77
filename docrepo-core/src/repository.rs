//! Typed, lifecycle-managed access to one collection.
//!
//! A [`Repository`] owns a [`ConnectionHandle`] and binds it to one collection and one
//! [`Entity`] type. It converts entities to stored documents on the way in, assigns
//! identifiers, and converts documents back on the way out.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::prelude::*;
//!
//! let mut users = Repository::<_, User>::new(ConnectionHandle::new(store.clone()));
//! let cancel = CancellationToken::new();
//!
//! let id = users.insert_one(&User::new("Ann"), None, &cancel).await?;
//! users.update_some_props(Filter::id(&id), &doc! { "address": { "city": "Oslo" } }, &cancel).await?;
//!
//! users.begin_transaction().await?;
//! users.array_push(Filter::id(&id), "tags", "admin", &cancel).await?;
//! users.commit_transaction().await?;
//!
//! users.dispose().await?;
//! ```

use bson::{Bson, Document, ser::serialize_to_bson, ser::serialize_to_document};
use serde::Serialize;
use std::{fmt, marker::PhantomData};
use tracing::warn;

use crate::{
    backend::{StoreBackend, UpdateOutcome},
    cancel::CancellationToken,
    collection::CollectionRef,
    connection::ConnectionHandle,
    document::{Entity, EntityExt, ID_FIELD, id_to_string},
    error::{DocumentStoreError, DocumentStoreResult, LogFailure, log_failure},
    merge::MergeOptions,
    query::IntoFilter,
};

/// Typed facade over one collection.
pub struct Repository<B: StoreBackend, T: Entity> {
    connection: ConnectionHandle<B>,
    name: Option<String>,
    collection: Option<CollectionRef>,
    disposed: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<B: StoreBackend, T: Entity> Repository<B, T> {
    /// Creates a repository whose collection name comes from [`Entity::collection_name`].
    pub fn new(connection: ConnectionHandle<B>) -> Self {
        Self {
            connection,
            name: None,
            collection: None,
            disposed: false,
            _entity: PhantomData,
        }
    }

    /// Creates a repository bound to `name`.
    pub fn with_collection(connection: ConnectionHandle<B>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(connection)
        }
    }

    /// Returns the underlying connection handle.
    pub fn connection(&self) -> &ConnectionHandle<B> {
        &self.connection
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Resolves and caches the collection reference.
    ///
    /// The name is taken from `name`, else the name given at construction, else
    /// [`Entity::collection_name`]. Once resolved, later calls return the cached reference.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Validation`] when no name is available.
    pub fn init_collection(&mut self, name: Option<&str>) -> DocumentStoreResult<&CollectionRef> {
        self.ensure_alive()?;

        let collection = match self.collection.take() {
            Some(collection) => collection,
            None => {
                let name = name
                    .or(self.name.as_deref())
                    .or_else(|| T::collection_name())
                    .ok_or_else(|| {
                        DocumentStoreError::Validation("no collection name configured".to_string())
                    })
                    .and_then(|name| CollectionRef::resolve(self.connection.database_name(), name))
                    .log_failure("init_collection", self.name.as_deref().unwrap_or_default())?;

                tracing::debug!(target: "docrepo", collection = %name, "Collection resolved");

                name
            }
        };

        Ok(&*self.collection.insert(collection))
    }

    /// Inserts `entity` and returns its identifier.
    ///
    /// The identifier is `custom_id` when given, else a non-empty `_id` already carried by the
    /// serialized entity, else the next value from [`ConnectionHandle::next_id`].
    pub async fn insert_one(
        &mut self,
        entity: &T,
        custom_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<String> {
        let collection = self.resolve()?;
        let mut document = entity.to_document().log_failure("insert_one", &collection)?;
        let carried = document.remove(ID_FIELD).filter(|id| !is_blank(id));

        let id = match (custom_id.filter(|id| !id.trim().is_empty()), carried) {
            (Some(id), _) => id.to_string(),
            (None, Some(id)) => id_to_string(&id),
            (None, None) => self.connection.next_id(&collection, cancel).await?.to_string(),
        };

        let mut stored = Document::new();
        stored.insert(ID_FIELD, id);
        for (key, value) in document {
            stored.insert(key, value);
        }

        self.connection.insert_one(&collection, stored, cancel).await
    }

    /// Merges `update` into the matching document; see [`ConnectionHandle::update_one`].
    pub async fn update_one(
        &mut self,
        filter: impl IntoFilter,
        update: Document,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        let collection = self.resolve()?;
        self.connection
            .update_one(&collection, filter, update, cancel)
            .await
    }

    /// Merges `entity` into the matching document, inserting it when nothing matches.
    ///
    /// `options` controls whether array fields are concatenated.
    pub async fn upsert(
        &mut self,
        filter: impl IntoFilter,
        entity: &T,
        options: MergeOptions,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let collection = self.resolve()?;
        let document = entity.to_document().log_failure("upsert", &collection)?;

        self.connection
            .merge_update(&collection, filter, document, options, cancel)
            .await
    }

    /// Sets only the fields present in `partial`; see [`ConnectionHandle::update_some_props`].
    pub async fn update_some_props<P: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        partial: &P,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        let collection = self.resolve()?;
        let partial = serialize_to_document(partial)
            .map_err(|e| DocumentStoreError::InvalidDocument(e.to_string()))
            .log_failure("update_some_props", &collection)?;

        self.connection
            .update_some_props(&collection, filter, &partial, cancel)
            .await
    }

    /// Deletes the first matching document; returns 0 or 1.
    pub async fn delete_one(
        &mut self,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        let collection = self.resolve()?;
        self.connection.delete_one(&collection, filter, cancel).await
    }

    /// Returns every matching entity. Documents that do not deserialize as `T` are skipped.
    pub async fn find(
        &mut self,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Vec<T>> {
        let collection = self.resolve()?;
        let documents = self.connection.find(&collection, filter, cancel).await?;

        Ok(decode_all(&collection, documents))
    }

    /// Returns the first matching entity, or `None`.
    ///
    /// # Errors
    ///
    /// Unlike [`find`](Self::find), a matching document that does not deserialize as `T` is an
    /// error.
    pub async fn find_one(
        &mut self,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Option<T>> {
        let collection = self.resolve()?;

        self.connection
            .find_one(&collection, filter, cancel)
            .await?
            .map(T::from_document)
            .transpose()
            .log_failure("find_one", &collection)
    }

    /// Returns every matching entity projected to `paths`.
    ///
    /// Fields left out of the projection must be optional on `T`, or the document is skipped.
    pub async fn find_with_field_selection<I, S>(
        &mut self,
        filter: impl IntoFilter,
        paths: I,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Vec<T>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let collection = self.resolve()?;
        let documents = self
            .connection
            .find_with_field_selection(&collection, filter, paths, cancel)
            .await?;

        Ok(decode_all(&collection, documents))
    }

    /// Counts the matching documents.
    pub async fn count(
        &mut self,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        let collection = self.resolve()?;
        self.connection.count(&collection, filter, cancel).await
    }

    /// Appends `value` to the array at `path`, creating it if absent.
    pub async fn array_push<V: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        value: V,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        let value = to_bson(&value, "array_push", &collection)?;

        self.connection
            .array_push(&collection, filter, path, value, cancel)
            .await
    }

    /// Sets the array element at `index`.
    pub async fn array_set<V: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        index: usize,
        value: V,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        let value = to_bson(&value, "array_set", &collection)?;

        self.connection
            .array_set(&collection, filter, path, index, value, cancel)
            .await
    }

    /// Sets every array element matching `condition` to `value`.
    pub async fn array_update<C: Serialize, V: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        condition: C,
        value: V,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        let condition = to_bson(&condition, "array_update", &collection)?;
        let value = to_bson(&value, "array_update", &collection)?;

        self.connection
            .array_update(&collection, filter, path, condition, value, cancel)
            .await
    }

    /// Removes every array element matching `condition`.
    pub async fn array_pull<C: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        condition: C,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        let condition = to_bson(&condition, "array_pull", &collection)?;

        self.connection
            .array_pull(&collection, filter, path, condition, cancel)
            .await
    }

    /// Removes the array element at `index`, compacting away every `null`.
    pub async fn array_remove_at(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        self.connection
            .array_remove_at(&collection, filter, path, index, cancel)
            .await
    }

    /// Replaces the array at `path` with `values`.
    pub async fn array_replace_all<V: Serialize>(
        &mut self,
        filter: impl IntoFilter,
        path: &str,
        values: &[V],
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        let collection = self.resolve()?;
        let values = values
            .iter()
            .map(|value| to_bson(value, "array_replace_all", &collection))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.connection
            .array_replace_all(&collection, filter, path, values, cancel)
            .await
    }

    /// Starts a transaction on the underlying connection.
    pub async fn begin_transaction(&mut self) -> DocumentStoreResult<&mut Self> {
        self.ensure_alive()?;
        self.connection.transaction_begin().await?;
        Ok(self)
    }

    /// Commits the open transaction.
    pub async fn commit_transaction(&mut self) -> DocumentStoreResult<&mut Self> {
        self.ensure_alive()?;
        self.connection.transaction_commit().await?;
        Ok(self)
    }

    /// Rolls back the open transaction.
    pub async fn rollback_transaction(&mut self) -> DocumentStoreResult<&mut Self> {
        self.ensure_alive()?;
        self.connection.transaction_rollback().await?;
        Ok(self)
    }

    /// Releases the collection reference and disposes the connection. Idempotent.
    ///
    /// Every later call fails with [`DocumentStoreError::Disposed`].
    pub async fn dispose(&mut self) -> DocumentStoreResult<()> {
        if self.disposed {
            return Ok(());
        }

        self.collection = None;
        let disposed = self.connection.dispose().await;
        self.disposed = true;

        disposed
    }

    fn ensure_alive(&self) -> DocumentStoreResult<()> {
        if self.disposed {
            let error = DocumentStoreError::Disposed;
            log_failure(
                "repository",
                self.collection
                    .as_ref()
                    .map(CollectionRef::name)
                    .or(self.name.as_deref())
                    .unwrap_or_default(),
                &error,
            );
            return Err(error);
        }

        Ok(())
    }

    fn resolve(&mut self) -> DocumentStoreResult<String> {
        Ok(self.init_collection(None)?.name().to_string())
    }
}

impl<B: StoreBackend, T: Entity> fmt::Debug for Repository<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("connection", &self.connection)
            .field("collection", &self.collection)
            .field("disposed", &self.disposed)
            .finish()
    }
}

fn is_blank(id: &Bson) -> bool {
    match id {
        Bson::Null | Bson::Undefined => true,
        Bson::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn to_bson<V: Serialize + ?Sized>(
    value: &V,
    operation: &'static str,
    collection: &str,
) -> DocumentStoreResult<Bson> {
    serialize_to_bson(value)
        .map_err(DocumentStoreError::from)
        .log_failure(operation, collection)
}

fn decode_all<T: Entity>(collection: &str, documents: Vec<Document>) -> Vec<T> {
    documents
        .into_iter()
        .filter_map(|document| match T::from_document(document) {
            Ok(entity) => Some(entity),
            Err(error) => {
                warn!(
                    target: "docrepo",
                    collection,
                    error = %error,
                    "Skipping document that does not match the entity type"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_replaced() {
        assert!(is_blank(&Bson::Null));
        assert!(is_blank(&Bson::String("  ".into())));
        assert!(!is_blank(&Bson::String("7".into())));
        assert!(!is_blank(&Bson::Int32(0)));
    }
}
