//! Sessions and snapshot transactions for the in-memory store.
//!
//! A transaction reads and writes a private copy of the store taken when it starts. The first
//! write to a collection records that collection's state as its baseline. Commit compares each
//! written collection with its baseline and replays only the differences, keyed by `_id`, onto
//! the shared data: documents the transaction inserted or changed are written, documents it
//! deleted are removed, and everything else another session wrote in the meantime is kept.
//! Abort drops the copy.

use async_trait::async_trait;
use bson::Document;
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use docrepo_core::{
    backend::BackendSession,
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Documents of every collection, in insertion order.
pub(crate) type Collections = HashMap<String, Vec<Document>>;

/// Private working copy held by an open transaction.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) working: Collections,
    baselines: Collections,
}

impl Transaction {
    fn new(working: Collections) -> Self {
        Self { working, baselines: Collections::new() }
    }

    /// Returns the working copy of `collection` for writing, recording its baseline first.
    pub(crate) fn collection_mut(&mut self, collection: &str) -> &mut Vec<Document> {
        if !self.baselines.contains_key(collection) {
            let baseline = self.working.get(collection).cloned().unwrap_or_default();
            self.baselines.insert(collection.to_string(), baseline);
        }

        self.working.entry(collection.to_string()).or_default()
    }
}

/// Writes the changes between `baseline` and `working` onto `shared`.
fn replay(shared: &mut Vec<Document>, baseline: &[Document], working: Vec<Document>) {
    for original in baseline {
        let Some(id) = original.get(ID_FIELD) else { continue };
        if !working.iter().any(|document| document.get(ID_FIELD) == Some(id)) {
            shared.retain(|document| document.get(ID_FIELD) != Some(id));
        }
    }

    for document in working {
        if baseline.contains(&document) {
            continue;
        }

        let existing = document
            .get(ID_FIELD)
            .and_then(|id| shared.iter().position(|current| current.get(ID_FIELD) == Some(id)));

        match existing {
            Some(index) => shared[index] = document,
            None => shared.push(document),
        }
    }
}

/// A session opened by [`InMemoryStore`](crate::InMemoryStore).
#[derive(Debug)]
pub struct InMemorySession {
    shared: Arc<RwLock<Collections>>,
    transaction: Option<Transaction>,
}

impl InMemorySession {
    pub(crate) fn new(shared: Arc<RwLock<Collections>>) -> Self {
        Self { shared, transaction: None }
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }
}

#[async_trait]
impl BackendSession for InMemorySession {
    async fn start_transaction(&mut self) -> DocumentStoreResult<()> {
        if self.transaction.is_some() {
            return Err(DocumentStoreError::TransactionAlreadyStarted);
        }

        let working = self.shared.read().await.clone();
        self.transaction = Some(Transaction::new(working));

        Ok(())
    }

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        let Some(mut transaction) = self.transaction.take() else {
            return Err(DocumentStoreError::TransactionNotStarted);
        };

        let written = transaction.baselines.len();
        let mut shared = self.shared.write().await;
        for (name, baseline) in transaction.baselines {
            let working = transaction.working.remove(&name).unwrap_or_default();
            replay(shared.entry(name).or_default(), &baseline, working);
        }

        debug!(target: "docrepo::memory", collections = written, "Published transaction");

        Ok(())
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        match self.transaction.take() {
            Some(_) => Ok(()),
            None => Err(DocumentStoreError::TransactionNotStarted),
        }
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn replay_keeps_concurrent_writes() {
        let baseline = vec![doc! { "_id": "1", "v": 1 }, doc! { "_id": "2", "v": 1 }];
        let mut shared = vec![
            doc! { "_id": "1", "v": 1 },
            doc! { "_id": "2", "v": 9 },
            doc! { "_id": "3", "v": 1 },
        ];
        let working = vec![doc! { "_id": "2", "v": 1 }, doc! { "_id": "4", "v": 1 }];

        replay(&mut shared, &baseline, working);

        assert_eq!(
            shared,
            vec![
                doc! { "_id": "2", "v": 9 },
                doc! { "_id": "3", "v": 1 },
                doc! { "_id": "4", "v": 1 },
            ]
        );
    }

    #[test]
    fn replay_overwrites_documents_the_transaction_changed() {
        let baseline = vec![doc! { "_id": "1", "v": 1 }];
        let mut shared = vec![doc! { "_id": "1", "v": 5 }];

        replay(&mut shared, &baseline, vec![doc! { "_id": "1", "v": 2 }]);

        assert_eq!(shared, vec![doc! { "_id": "1", "v": 2 }]);
    }
}
