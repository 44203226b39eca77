//! MongoDB backend implementation for docrepo.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters and
//! updates are handed to the server unchanged, and sessions map onto driver sessions, so
//! transactions require a replica set or sharded cluster.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docrepo = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docrepo::{backend::StoreBackendBuilder, config::StoreConfig, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     // or from the environment
//!     let store = MongoDbStoreBuilder::from_config(&StoreConfig::from_env()?)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_mongodb;

pub mod store;

pub use store::{MongoDbSession, MongoDbStore, MongoDbStoreBuilder};
