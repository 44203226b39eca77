//! Connection and session lifecycle.
//!
//! A [`ConnectionHandle`] owns one backend (a client bound to one database) and at most one
//! session. The session is created by [`transaction_begin`](ConnectionHandle::transaction_begin)
//! and destroyed by commit, rollback, [`disconnect`](ConnectionHandle::disconnect) or
//! [`dispose`](ConnectionHandle::dispose).
//!
//! Session state is mutated through `&mut self`, so a handle cannot be shared between concurrent
//! units of work. Backends are cheap to clone; give every request its own handle:
//!
//! ```ignore
//! let backend = MongoDbStore::builder(dsn, "app").build().await?;
//!
//! // per request
//! let mut connection = ConnectionHandle::new(backend.clone());
//! connection.transaction_begin().await?;
//! connection.insert_one("orders", doc! { "_id": "1" }, &cancel).await?;
//! connection.transaction_commit().await?;
//! ```

use std::fmt;
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendSession, StoreBackend},
    error::{DocumentStoreError, DocumentStoreResult, LogFailure},
};

/// A session borrowed for the duration of one operation.
///
/// Operations join the handle's open session when there is one and otherwise run in a
/// session scoped to the single call, which is dropped when the lease goes away.
pub(crate) enum SessionLease<'a, S> {
    Joined(&'a mut S),
    Scoped(S),
}

impl<S> SessionLease<'_, S> {
    pub(crate) fn session(&mut self) -> &mut S {
        match self {
            SessionLease::Joined(session) => session,
            SessionLease::Scoped(session) => session,
        }
    }
}

/// Owner of a backend and its optional session/transaction.
pub struct ConnectionHandle<B: StoreBackend> {
    backend: B,
    session: Option<B::Session>,
    disposed: bool,
}

impl<B: StoreBackend> ConnectionHandle<B> {
    /// Creates a handle over `backend` with no session.
    pub fn new(backend: B) -> Self {
        Self { backend, session: None, disposed: false }
    }

    /// Returns the backend this handle runs against.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the name of the database the backend is bound to.
    pub fn database_name(&self) -> &str {
        self.backend.database_name()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns `true` while a session exists on this handle.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Returns `true` while a transaction is open on this handle.
    pub fn in_transaction(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.in_transaction())
    }

    /// Fails with [`DocumentStoreError::Disposed`] once the handle is disposed. Not logged here;
    /// the operation that returns the error logs it.
    pub(crate) fn ensure_alive(&self) -> DocumentStoreResult<()> {
        if self.disposed {
            return Err(DocumentStoreError::Disposed);
        }

        Ok(())
    }

    /// Borrows the handle's session, or opens a session scoped to one call.
    pub(crate) async fn lease(
        &mut self,
    ) -> DocumentStoreResult<(&B, SessionLease<'_, B::Session>)> {
        self.ensure_alive()?;

        let lease = match self.session.as_mut() {
            Some(session) => SessionLease::Joined(session),
            None => SessionLease::Scoped(self.backend.start_session().await?),
        };

        Ok((&self.backend, lease))
    }

    /// Checks the handle is usable and logs that it is ready. Safe to call repeatedly.
    pub fn connect(&self) -> DocumentStoreResult<()> {
        self.ensure_alive()
            .log_failure("connect", self.database_name())?;

        info!(target: "docrepo", database = self.database_name(), "Connection ready");

        Ok(())
    }

    /// Closes and clears the session, aborting its transaction if one is open.
    ///
    /// Safe to call when no session exists.
    pub async fn disconnect(&mut self) -> DocumentStoreResult<()> {
        let result = match self.ensure_alive() {
            Ok(()) => self.close_session().await,
            Err(error) => Err(error),
        };

        result.log_failure("disconnect", self.backend.database_name())
    }

    /// Disconnects, then connects again.
    pub async fn reconnect(&mut self) -> DocumentStoreResult<()> {
        self.disconnect().await?;
        self.connect()
    }

    /// Opens a session and starts a transaction on it.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::TransactionAlreadyStarted`] if a session already exists;
    /// the existing session is left untouched.
    pub async fn transaction_begin(&mut self) -> DocumentStoreResult<()> {
        let result = async {
            self.ensure_alive()?;
            if self.session.is_some() {
                return Err(DocumentStoreError::TransactionAlreadyStarted);
            }

            let mut session = self.backend.start_session().await?;
            session.start_transaction().await?;
            self.session = Some(session);

            debug!(target: "docrepo", database = self.backend.database_name(), "Transaction started");

            Ok(())
        }
        .await;

        result.log_failure("transaction_begin", self.backend.database_name())
    }

    /// Commits the open transaction and clears the session.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::TransactionNotStarted`] if there is no session.
    pub async fn transaction_commit(&mut self) -> DocumentStoreResult<()> {
        let result = match self.session.take() {
            _ if self.disposed => Err(DocumentStoreError::Disposed),
            None => Err(DocumentStoreError::TransactionNotStarted),
            Some(mut session) => {
                let committed = session.commit_transaction().await;
                if committed.is_ok() {
                    debug!(target: "docrepo", database = self.backend.database_name(), "Transaction committed");
                }
                committed
            }
        };

        result.log_failure("transaction_commit", self.backend.database_name())
    }

    /// Aborts the open transaction and clears the session.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::TransactionNotStarted`] if there is no session.
    pub async fn transaction_rollback(&mut self) -> DocumentStoreResult<()> {
        let result = match self.session.take() {
            _ if self.disposed => Err(DocumentStoreError::Disposed),
            None => Err(DocumentStoreError::TransactionNotStarted),
            Some(mut session) => {
                let aborted = session.abort_transaction().await;
                if aborted.is_ok() {
                    debug!(target: "docrepo", database = self.backend.database_name(), "Transaction rolled back");
                }
                aborted
            }
        };

        result.log_failure("transaction_rollback", self.backend.database_name())
    }

    /// Terminates any session and marks the handle disposed. Idempotent.
    ///
    /// The handle is disposed even when aborting an open transaction fails; that failure is
    /// still returned.
    pub async fn dispose(&mut self) -> DocumentStoreResult<()> {
        if self.disposed {
            return Ok(());
        }

        if self.in_transaction() {
            warn!(
                target: "docrepo",
                database = self.backend.database_name(),
                "Disposing connection with an open transaction; rolling back"
            );
        }

        let closed = self.close_session().await;
        self.disposed = true;

        closed.log_failure("dispose", self.backend.database_name())
    }

    /// Disposes the handle and shuts the backend down.
    pub async fn shutdown(mut self) -> DocumentStoreResult<()> {
        self.dispose().await?;
        self.backend.shutdown().await
    }

    /// Creates a new, empty collection.
    pub async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let result = async {
            self.ensure_alive()?;
            validate_collection(name)?;
            self.backend.create_collection(name).await
        }
        .await;

        result.log_failure("create_collection", name)
    }

    /// Drops a collection and all its documents.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let result = async {
            self.ensure_alive()?;
            validate_collection(name)?;
            self.backend.drop_collection(name).await
        }
        .await;

        result.log_failure("drop_collection", name)
    }

    /// Lists the collections of the bound database.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let result = match self.ensure_alive() {
            Ok(()) => self.backend.list_collections().await,
            Err(error) => Err(error),
        };

        result.log_failure("list_collections", self.backend.database_name())
    }

    async fn close_session(&mut self) -> DocumentStoreResult<()> {
        match self.session.take() {
            Some(mut session) if session.in_transaction() => session.abort_transaction().await,
            _ => Ok(()),
        }
    }
}

impl<B: StoreBackend> fmt::Debug for ConnectionHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("backend", &self.backend)
            .field("has_session", &self.session.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// Rejects empty collection names. The caller logs the failure.
pub(crate) fn validate_collection(name: &str) -> DocumentStoreResult<()> {
    if name.trim().is_empty() {
        return Err(DocumentStoreError::Validation(
            "collection name must not be empty".to_string(),
        ));
    }

    Ok(())
}
