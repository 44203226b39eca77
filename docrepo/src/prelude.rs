//! Convenient re-exports of commonly used types from docrepo.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docrepo::prelude::*;
//! ```

pub use docrepo_core::{
    backend::{BackendSession, FindOptions, StoreBackend, StoreBackendBuilder, UpdateOptions, UpdateOutcome},
    cancel::CancellationToken,
    collection::CollectionRef,
    config::StoreConfig,
    connection::ConnectionHandle,
    document::{Entity, EntityExt, ID_FIELD},
    error::{DocumentStoreError, DocumentStoreResult},
    merge::MergeOptions,
    query::{Expr, FieldOp, Filter, IntoFilter, Sort, SortDirection},
    repository::Repository,
};
