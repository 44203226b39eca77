//! Main docrepo crate: typed repositories over MongoDB-style document stores.
//!
//! This crate is the primary entry point for users of docrepo. It re-exports the core types from
//! the sub-crates and provides access to the storage backends.
//!
//! # Features
//!
//! - **Sessions and transactions** - One [`ConnectionHandle`](connection::ConnectionHandle) per unit of work
//! - **Partial updates** - Deep-merge updates that keep untouched fields, and flattened `$set` updates
//! - **Array primitives** - Push, set, positional update, pull, remove-at and replace-all
//! - **Auto-increment identifiers** - Numeric string ids assigned on insert
//! - **Typed repositories** - Entity conversion, lazy collection binding and disposal
//! - **Cancellation** - Every operation takes a [`CancellationToken`](cancel::CancellationToken)
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore, bson::doc};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! impl Entity for User {
//!     fn collection_name() -> Option<&'static str> { Some("users") }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = InMemoryStore::builder().build().await?;
//!     let mut users = Repository::<_, User>::new(ConnectionHandle::new(store.clone()));
//!     let cancel = CancellationToken::new();
//!
//!     // Assigned "1": the collection is empty
//!     let id = users.insert_one(&User { id: None, name: "John".into(), age: 20 }, None, &cancel).await?;
//!
//!     // Only `age` changes; `name` is kept
//!     users.update_one(Filter::id(&id), doc! { "$set": { "age": 30 } }, &cancel).await?;
//!
//!     users.begin_transaction().await?;
//!     users.array_push(Filter::id(&id), "tags", "admin", &cancel).await?;
//!     users.commit_transaction().await?;
//!
//!     users.dispose().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docrepo_core::{
    array, backend, cancel, collection, config, connection, document, error, merge, operations,
    query, repository, sequence,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docrepo_memory::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrepo_mongodb::{MongoDbSession, MongoDbStore, MongoDbStoreBuilder};
}
