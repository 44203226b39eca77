//! Cooperative cancellation for in-flight store operations.
//!
//! Every operation on a [`ConnectionHandle`](crate::connection::ConnectionHandle) or
//! [`Repository`](crate::repository::Repository) takes a [`CancellationToken`]. Cancelling the
//! token aborts the operation at its next suspension point and surfaces
//! [`DocumentStoreError::Cancelled`]. No compensating rollback is performed: a transaction
//! that was open stays open until it is rolled back or the handle is disposed.

use futures::future::{Either, select};
use mea::latch::Latch;
use std::{fmt, future::Future, pin::pin, sync::Arc};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A cloneable cancellation signal.
///
/// Clones share state: cancelling any clone cancels them all.
///
/// # Example
///
/// ```ignore
/// let cancel = CancellationToken::new();
/// let worker = cancel.clone();
///
/// tokio::spawn(async move { repo.find(doc! {}, &worker).await });
/// cancel.cancel();
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    latch: Arc<Latch>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self { latch: Arc::new(Latch::new(1)) }
    }

    /// Signals cancellation. Calling it more than once has no further effect.
    pub fn cancel(&self) {
        if !self.is_cancelled() {
            self.latch.count_down();
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on this token or a clone.
    pub fn is_cancelled(&self) -> bool {
        self.latch.count() == 0
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        self.latch.wait().await
    }

    /// Drives `operation` to completion unless the token is cancelled first.
    ///
    /// A token that is already cancelled fails immediately without polling `operation`.
    pub async fn run<F, T>(&self, operation: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        if self.is_cancelled() {
            return Err(DocumentStoreError::Cancelled);
        }

        let operation = pin!(operation);
        let cancelled = pin!(self.cancelled());

        match select(operation, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right(_) => Err(DocumentStoreError::Cancelled),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let token = CancellationToken::new();

        let value = token.run(async { Ok::<_, DocumentStoreError>(5) }).await.unwrap();

        assert_eq!(value, 5);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();

        let result = token.run(async { Ok::<_, DocumentStoreError>(()) }).await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_operation() {
        let token = CancellationToken::new();
        let remote = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });

        let result = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, DocumentStoreError>(())
            })
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }
}
