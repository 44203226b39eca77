//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over different storage implementations, allowing
//! the connection handle and everything built on it to work against MongoDB or the in-memory store.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for collection-scoped document
//! operations. Every document operation runs inside a [`BackendSession`]; the connection handle
//! decides whether that session is a long-lived transactional one or a short-lived one opened for
//! a single call.
//!
//! Filters and updates are passed as MongoDB-style documents (`{ "_id": "1" }`,
//! `{ "$set": { "age": 30 } }`); backends either hand them to a native engine or interpret them.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`BackendSession`]: A session a backend opens, optionally carrying a transaction
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::DocumentStoreResult, query::Sort};

/// Options for find operations.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Ordering of the results.
    pub sort: Option<Sort>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip.
    pub skip: Option<usize>,
    /// Projection document (`{ "field": 1 }`).
    pub projection: Option<Document>,
}

impl FindOptions {
    /// Options that stop after the first match.
    pub fn first() -> Self {
        Self { limit: Some(1), ..Self::default() }
    }
}

/// Options for native update operations.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches the filter.
    pub upsert: bool,
    /// Array filters binding positional identifiers such as `$[elem]`.
    pub array_filters: Option<Vec<Document>>,
}

/// Result of an update or replace call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Number of documents that matched the filter.
    pub matched_count: u64,
    /// Number of documents actually changed.
    pub modified_count: u64,
    /// Identifier of the document created by an upsert, if any.
    pub upserted_id: Option<Bson>,
}

/// A session opened by a backend.
///
/// A session scopes a sequence of operations. Once [`start_transaction`](Self::start_transaction)
/// has been called, every operation issued with the session joins the transaction until it is
/// committed or aborted.
#[async_trait]
pub trait BackendSession: Send {
    /// Starts a transaction on this session.
    async fn start_transaction(&mut self) -> DocumentStoreResult<()>;

    /// Commits the open transaction.
    async fn commit_transaction(&mut self) -> DocumentStoreResult<()>;

    /// Aborts the open transaction, discarding its writes.
    async fn abort_transaction(&mut self) -> DocumentStoreResult<()>;

    /// Returns `true` while a transaction is open on this session.
    fn in_transaction(&self) -> bool;
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and cheap to clone, so that each unit of work can own its
/// own [`ConnectionHandle`](crate::connection::ConnectionHandle) over a shared client.
///
/// # Error Handling
///
/// Driver failures are reported as [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend)
/// carrying the original driver error.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Session type opened by this backend.
    type Session: BackendSession;

    /// Returns the name of the database this backend is bound to.
    fn database_name(&self) -> &str;

    /// Opens a new session.
    async fn start_session(&self) -> DocumentStoreResult<Self::Session>;

    /// Inserts one document verbatim and returns the stored `_id`.
    ///
    /// Fails if a document with the same `_id` already exists.
    async fn insert_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<Bson>;

    /// Returns the documents matching `filter`, shaped by `options`.
    async fn find(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`.
    async fn count_documents(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64>;

    /// Deletes the first document matching `filter` and returns the number removed.
    async fn delete_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64>;

    /// Replaces the first document matching `filter` with `replacement`.
    ///
    /// The stored `_id` is kept. With `upsert`, a new document is created when nothing matches.
    async fn replace_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies an operator update (`$set`, `$unset`, `$push`, `$pull`) to the first match.
    async fn update_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Creates a new, empty collection.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection and all its documents. This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the bound database.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
