//! A typed access layer over MongoDB-style document stores.
//!
//! This crate is the core of the docrepo project and provides:
//!
//! - **Backend abstraction** ([`backend`]) - Traits for implementing storage backends and their sessions
//! - **Connections** ([`connection`]) - Session and transaction lifecycle on one backend
//! - **Document operations** ([`operations`]) - Collection-scoped insert, find, count, delete and update
//! - **Partial updates** ([`merge`]) - Deep-merge updates and flattened `$set` updates
//! - **Array primitives** ([`array`]) - Push, set, positional update, pull, remove-at and replace
//! - **Identifiers** ([`sequence`]) - Auto-increment identifier generation
//! - **Repositories** ([`repository`]) - Typed, lifecycle-managed access to one collection
//! - **Filters** ([`query`]) - Type-safe filter and sort construction
//! - **Documents** ([`document`]) - The entity trait and document conversions
//! - **Cancellation** ([`cancel`]) - Tokens that abort in-flight operations
//! - **Configuration** ([`config`]) - Connection settings from JSON or the environment
//! - **Error handling** ([`error`]) - The error taxonomy shared by every layer
//!
//! # Example
//!
//! ```ignore
//! use docrepo_core::{connection::ConnectionHandle, cancel::CancellationToken, query::Filter};
//! use bson::doc;
//!
//! let mut connection = ConnectionHandle::new(backend);
//! let cancel = CancellationToken::new();
//!
//! let id = connection.insert_one("users", doc! { "_id": "1", "name": "John", "age": 20 }, &cancel).await?;
//! connection.update_one("users", Filter::id(&id), doc! { "$set": { "age": 30 } }, &cancel).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_core;

pub mod array;
pub mod backend;
pub mod cancel;
pub mod collection;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod merge;
pub mod operations;
pub mod query;
pub mod repository;
pub mod sequence;
