//! Collection-scoped document operations.
//!
//! These are the primitives every higher layer is built from. Each call joins the handle's
//! session when one is open, so it participates in the running transaction, and otherwise
//! runs in a session opened for that call alone.
//!
//! Every call takes a [`CancellationToken`]. A failure is logged once, by the operation that
//! returns it, and handed back unchanged.

use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    backend::{FindOptions, StoreBackend, UpdateOptions, UpdateOutcome},
    cancel::CancellationToken,
    connection::{ConnectionHandle, validate_collection},
    document::id_to_string,
    error::{DocumentStoreResult, LogFailure},
    query::IntoFilter,
};

impl<B: StoreBackend> ConnectionHandle<B> {
    /// Inserts `document` verbatim and returns its `_id` as a string.
    ///
    /// The identifier is the one reported back by the backend, not recomputed locally.
    pub async fn insert_one(
        &mut self,
        collection: &str,
        document: Document,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<String> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let (backend, mut lease) = self.lease().await?;
                let id = backend
                    .insert_one(lease.session(), collection, document)
                    .await?;

                debug!(target: "docrepo", collection, id = %id, "Inserted document");

                Ok(id_to_string(&id))
            })
            .await
            .log_failure("insert_one", collection)
    }

    /// Returns the first document matching `filter`, or `None`.
    pub async fn find_one(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Option<Document>> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                let mut found = backend
                    .find(lease.session(), collection, filter, FindOptions::first())
                    .await?;

                Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
            })
            .await
            .log_failure("find_one", collection)
    }

    /// Returns every document matching `filter`.
    pub async fn find(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.find_with_options(collection, filter, FindOptions::default(), cancel)
            .await
    }

    /// Returns every document matching `filter`, projected to `paths`.
    ///
    /// Each path is included with `{ path: 1 }`; `_id` is returned as usual.
    pub async fn find_with_field_selection<I, S>(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        paths: I,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let projection = paths
            .into_iter()
            .map(|path| (path.as_ref().to_string(), Bson::Int32(1)))
            .collect::<Document>();

        let options = FindOptions {
            projection: (!projection.is_empty()).then_some(projection),
            ..FindOptions::default()
        };

        self.find_with_options(collection, filter, options, cancel)
            .await
    }

    /// Returns the documents matching `filter`, sorted, paged and projected by `options`.
    pub async fn find_with_options(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        options: FindOptions,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<Vec<Document>> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                backend
                    .find(lease.session(), collection, filter, options)
                    .await
            })
            .await
            .log_failure("find", collection)
    }

    /// Counts the documents matching `filter`.
    pub async fn count(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                backend
                    .count_documents(lease.session(), collection, filter)
                    .await
            })
            .await
            .log_failure("count", collection)
    }

    /// Deletes the first document matching `filter`; returns 0 or 1.
    pub async fn delete_one(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<u64> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                let deleted = backend
                    .delete_one(lease.session(), collection, filter)
                    .await?;

                debug!(target: "docrepo", collection, deleted, "Deleted documents");

                Ok(deleted)
            })
            .await
            .log_failure("delete_one", collection)
    }

    /// Replaces the first document matching `filter` with `replacement`.
    pub async fn replace_one(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        replacement: Document,
        upsert: bool,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<UpdateOutcome> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                backend
                    .replace_one(lease.session(), collection, filter, replacement, upsert)
                    .await
            })
            .await
            .log_failure("replace_one", collection)
    }

    /// Applies an operator update (`$set`, `$unset`, `$push`, `$pull`) natively.
    pub async fn apply_update(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        update: Document,
        options: UpdateOptions,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<UpdateOutcome> {
        cancel
            .run(async {
                validate_collection(collection)?;
                let filter = filter.into_filter()?;
                let (backend, mut lease) = self.lease().await?;
                let outcome = backend
                    .update_one(lease.session(), collection, filter, update, options)
                    .await?;

                debug!(
                    target: "docrepo",
                    collection,
                    matched = outcome.matched_count,
                    modified = outcome.modified_count,
                    "Applied update"
                );

                Ok(outcome)
            })
            .await
            .log_failure("apply_update", collection)
    }

    /// Returns `true` if at least one document matches `filter`.
    pub async fn exists(
        &mut self,
        collection: &str,
        filter: impl IntoFilter,
        cancel: &CancellationToken,
    ) -> DocumentStoreResult<bool> {
        Ok(self
            .find_with_options(
                collection,
                filter,
                FindOptions { projection: Some(doc! { "_id": 1 }), ..FindOptions::first() },
                cancel,
            )
            .await?
            .first()
            .is_some())
    }
}
