//! Error types and result types for document store operations.
//!
//! This module provides the error taxonomy shared by every layer of the crate, from the
//! backends up to the typed repository. Use [`DocumentStoreResult<T>`] as the return type
//! for fallible operations.
//!
//! A missing document is never an error: single-document lookups return `Ok(None)`.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Boxed error produced by a storage driver, kept intact as the error source.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The connection handle or repository has been disposed.
    #[error("Object has been disposed")]
    Disposed,
    /// A required argument (collection name, document, update) was missing or empty.
    #[error("Validation error: {0}")]
    Validation(String),
    /// `transaction_begin` was called while a session is already active.
    #[error("Transaction already started")]
    TransactionAlreadyStarted,
    /// `transaction_commit` or `transaction_rollback` was called with no active session.
    #[error("Transaction not started")]
    TransactionNotStarted,
    /// The operation is not valid for the current shape of the stored document.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    /// The operation was cancelled through its cancellation token.
    #[error("Operation was cancelled")]
    Cancelled,
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The store configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error raised by the underlying storage driver, passed through unchanged.
    #[error("Backend error: {0}")]
    Backend(#[source] BackendError),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Wraps a driver error without reinterpreting it.
    pub fn backend(err: impl Into<BackendError>) -> Self {
        DocumentStoreError::Backend(err.into())
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// Emits the log event for a failed operation.
///
/// Cancellation is expected control flow and logs at `warn`; everything else logs at `error`.
pub(crate) fn log_failure(operation: &'static str, collection: &str, error: &DocumentStoreError) {
    match error {
        DocumentStoreError::Cancelled => tracing::warn!(
            target: "docrepo",
            operation,
            collection,
            "Operation cancelled"
        ),
        _ => tracing::error!(
            target: "docrepo",
            operation,
            collection,
            error = %error,
            "Document store operation failed"
        ),
    }
}

/// Adds failure logging to a result before it is handed back to the caller.
pub(crate) trait LogFailure {
    fn log_failure(self, operation: &'static str, collection: &str) -> Self;
}

impl<T> LogFailure for DocumentStoreResult<T> {
    fn log_failure(self, operation: &'static str, collection: &str) -> Self {
        self.inspect_err(|error| log_failure(operation, collection, error))
    }
}
