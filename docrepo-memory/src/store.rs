//! In-memory storage implementation for document stores.
//!
//! Documents are kept per collection in insertion order behind an async-aware read-write lock.
//! Filters, updates, sorting and projection are interpreted locally with MongoDB semantics.

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use std::sync::Arc;
use tracing::debug;

use docrepo_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    document::{ID_FIELD, id_to_string},
    error::{DocumentStoreError, DocumentStoreResult},
    merge::deep_merge,
    query::SortDirection,
};

use crate::{
    evaluator::{Comparable, matches, values_at},
    session::{Collections, InMemorySession},
    updater,
};

/// Database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "memory";

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones share the
/// same data. Give each unit of work its own
/// [`ConnectionHandle`](docrepo_core::connection::ConnectionHandle) over a clone.
///
/// Queries scan every document of a collection; there are no indexes.
///
/// # Example
///
/// ```ignore
/// use docrepo_memory::InMemoryStore;
/// use docrepo_core::connection::ConnectionHandle;
///
/// let store = InMemoryStore::builder().database("app").build().await?;
/// let mut connection = ConnectionHandle::new(store.clone());
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    database: String,
    collections: Arc<RwLock<Collections>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store bound to [`DEFAULT_DATABASE`].
    pub fn new() -> Self {
        Self::with_database(DEFAULT_DATABASE)
    }

    /// Creates an empty store bound to `database`.
    pub fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Arc::new(RwLock::new(Collections::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Runs `read` against the session's transaction copy, or the shared data.
    async fn read<R>(
        &self,
        session: &mut InMemorySession,
        collection: &str,
        read: impl FnOnce(&[Document]) -> DocumentStoreResult<R>,
    ) -> DocumentStoreResult<R> {
        if let Some(transaction) = session.transaction_mut() {
            let documents = transaction.working.get(collection).map(Vec::as_slice);
            return read(documents.unwrap_or_default());
        }

        let collections = self.collections.read().await;
        read(collections.get(collection).map(Vec::as_slice).unwrap_or_default())
    }

    /// Runs `write` against the session's transaction copy, or the shared data.
    ///
    /// The collection is created when missing.
    async fn write<R>(
        &self,
        session: &mut InMemorySession,
        collection: &str,
        write: impl FnOnce(&mut Vec<Document>) -> DocumentStoreResult<R>,
    ) -> DocumentStoreResult<R> {
        if let Some(transaction) = session.transaction_mut() {
            return write(transaction.collection_mut(collection));
        }

        let mut collections = self.collections.write().await;
        write(collections.entry(collection.to_string()).or_default())
    }
}

/// Index of the first document matching `filter`.
fn position(documents: &[Document], filter: &Document) -> DocumentStoreResult<Option<usize>> {
    for (index, document) in documents.iter().enumerate() {
        if matches(document, filter)? {
            return Ok(Some(index));
        }
    }

    Ok(None)
}

/// Places `_id` first, generating one when it is missing.
fn with_id(document: Document, id: Option<Bson>) -> (Bson, Document) {
    let mut document = document;
    let id = id
        .or_else(|| document.remove(ID_FIELD))
        .unwrap_or_else(|| Bson::String(uuid::Uuid::new_v4().to_string()));
    document.remove(ID_FIELD);

    let mut stored = Document::new();
    stored.insert(ID_FIELD, id.clone());
    for (key, value) in document {
        stored.insert(key, value);
    }

    (id, stored)
}

fn insert_unique(documents: &mut Vec<Document>, collection: &str, id: &Bson, document: Document) -> DocumentStoreResult<()> {
    let duplicate = documents
        .iter()
        .any(|existing| existing.get(ID_FIELD).is_some_and(|existing| Comparable::from(existing) == Comparable::from(id)));

    if duplicate {
        return Err(DocumentStoreError::DocumentAlreadyExists(id_to_string(id), collection.to_string()));
    }

    documents.push(document);
    Ok(())
}

fn sort_key<'a>(document: &'a Document, field: &str) -> Comparable<'a> {
    values_at(document, field)
        .first()
        .map(|value| Comparable::from(*value))
        .unwrap_or(Comparable::Null)
}

/// Applies a `{ path: 1 }` inclusion or `{ path: 0 }` exclusion projection.
fn project(document: Document, projection: &Document) -> Document {
    let included = |value: &Bson| !matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
        && !matches!(value, Bson::Double(v) if *v == 0.0);
    let keep_id = projection.get(ID_FIELD).is_none_or(included);
    let inclusive = projection
        .iter()
        .any(|(key, value)| key.as_str() != ID_FIELD && included(value))
        || (projection.len() == 1 && projection.get(ID_FIELD).is_some_and(included));

    if !inclusive {
        let mut projected = document;
        for (path, _) in projection.iter().filter(|(_, value)| !included(*value)) {
            remove_path(&mut projected, &path.split('.').collect::<Vec<_>>());
        }
        return projected;
    }

    let mut projected = Document::new();
    if keep_id {
        if let Some(id) = document.get(ID_FIELD) {
            projected.insert(ID_FIELD, id.clone());
        }
    }
    for (path, _) in projection
        .iter()
        .filter(|(key, value)| key.as_str() != ID_FIELD && included(*value))
    {
        let mut picked = Document::new();
        copy_path(&document, &path.split('.').collect::<Vec<_>>(), &mut picked);
        deep_merge(&mut projected, &picked, Default::default());
    }

    projected
}

fn copy_path(source: &Document, segments: &[&str], target: &mut Document) {
    let [head, rest @ ..] = segments else { return };
    let Some(value) = source.get(*head) else { return };

    if rest.is_empty() {
        target.insert(*head, value.clone());
        return;
    }

    if let Bson::Document(nested) = value {
        let mut child = Document::new();
        copy_path(nested, rest, &mut child);
        if !child.is_empty() {
            target.insert(*head, child);
        }
    }
}

fn remove_path(document: &mut Document, segments: &[&str]) {
    match segments {
        [] => {}
        [leaf] => {
            document.remove(*leaf);
        }
        [head, rest @ ..] => {
            if let Some(Bson::Document(nested)) = document.get_mut(*head) {
                remove_path(nested, rest);
            }
        }
    }
}

/// Builds a replacement that keeps `existing`'s `_id`.
fn replacement_for(existing: &Document, replacement: &Document) -> DocumentStoreResult<Document> {
    if replacement.keys().any(|key| key.starts_with('$')) {
        return Err(DocumentStoreError::InvalidOperation(
            "replacement document must not contain update operators".to_string(),
        ));
    }

    let id = existing.get(ID_FIELD).cloned();
    if let (Some(new_id), Some(id)) = (replacement.get(ID_FIELD), &id) {
        if Comparable::from(new_id) != Comparable::from(id) {
            return Err(DocumentStoreError::InvalidOperation(
                "the _id field cannot be changed".to_string(),
            ));
        }
    }

    Ok(with_id(replacement.clone(), id).1)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Session = InMemorySession;

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        Ok(InMemorySession::new(self.collections.clone()))
    }

    async fn insert_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<Bson> {
        let (id, document) = with_id(document, None);

        self.write(session, collection, |documents| {
            insert_unique(documents, collection, &id, document)
        })
        .await?;

        Ok(id)
    }

    async fn find(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.read(session, collection, |documents| {
            let mut found = Vec::new();
            for document in documents {
                if matches(document, &filter)? {
                    found.push(document);
                }
            }

            if let Some(sort) = &options.sort {
                found.sort_by(|a, b| {
                    let ordering = sort_key(a, &sort.field).sort_cmp(&sort_key(b, &sort.field));
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                });
            }

            Ok(found
                .into_iter()
                .skip(options.skip.unwrap_or(0))
                .take(options.limit.unwrap_or(usize::MAX))
                .map(|document| match &options.projection {
                    Some(projection) => project(document.clone(), projection),
                    None => document.clone(),
                })
                .collect())
        })
        .await
    }

    async fn count_documents(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64> {
        self.read(session, collection, |documents| {
            let mut count = 0;
            for document in documents {
                if matches(document, &filter)? {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }

    async fn delete_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64> {
        self.write(session, collection, |documents| {
            Ok(match position(documents, &filter)? {
                Some(index) => {
                    documents.remove(index);
                    1
                }
                None => 0,
            })
        })
        .await
    }

    async fn replace_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.write(session, collection, |documents| {
            if let Some(index) = position(documents, &filter)? {
                let replaced = replacement_for(&documents[index], &replacement)?;
                let modified = replaced != documents[index];
                documents[index] = replaced;

                return Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_id: None,
                });
            }

            if !upsert {
                return Ok(UpdateOutcome::default());
            }

            let seed_id = updater::seed_from_filter(&filter)?.remove(ID_FIELD);
            let (id, document) = with_id(replacement, seed_id);
            insert_unique(documents, collection, &id, document)?;

            debug!(target: "docrepo::memory", collection, id = %id, "Upserted document");

            Ok(UpdateOutcome { upserted_id: Some(id), ..UpdateOutcome::default() })
        })
        .await
    }

    async fn update_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let array_filters = options.array_filters.unwrap_or_default();

        self.write(session, collection, |documents| {
            if let Some(index) = position(documents, &filter)? {
                let modified = updater::apply(&mut documents[index], &update, &array_filters)?;

                return Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_id: None,
                });
            }

            if !options.upsert {
                return Ok(UpdateOutcome::default());
            }

            let mut seed = updater::seed_from_filter(&filter)?;
            updater::apply(&mut seed, &update, &array_filters)?;
            let (id, document) = with_id(seed, None);
            insert_unique(documents, collection, &id, document)?;

            Ok(UpdateOutcome { upserted_id: Some(id), ..UpdateOutcome::default() })
        })
        .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut collections = self.collections.write().await;

        if collections.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .collections
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    database: Option<String>,
}

impl InMemoryStoreBuilder {
    /// Sets the database name reported by the store.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new, empty [`InMemoryStore`].
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(match self.database {
            Some(database) => InMemoryStore::with_database(database),
            None => InMemoryStore::new(),
        })
    }
}
