//! In-memory document storage backend for docrepo.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait that
//! interprets MongoDB-style filters and update operators locally. It is ideal for development and
//! testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **MongoDB semantics** - Dotted paths, array matching, `$set`/`$unset`/`$push`/`$pull` and array filters
//! - **Snapshot transactions** - Writes inside a transaction are published on commit and dropped on abort
//! - **Sorting, paging and projection** - Everything `FindOptions` can express
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo_core::{cancel::CancellationToken, connection::ConnectionHandle};
//! use docrepo_memory::InMemoryStore;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connection = ConnectionHandle::new(InMemoryStore::new());
//!     let cancel = CancellationToken::new();
//!
//!     connection.insert_one("users", doc! { "_id": "1", "name": "Alice" }, &cancel).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_memory;

pub mod evaluator;
pub mod session;
pub mod store;
pub mod updater;

pub use session::InMemorySession;
pub use store::{InMemoryStore, InMemoryStoreBuilder};
