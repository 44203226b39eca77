use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection,
    options::{
        ClientOptions, FindOptions as MongoFindOptions, ReplaceOptions,
        UpdateOptions as MongoUpdateOptions,
    },
};
use tracing::info;

use docrepo_core::{
    backend::{
        BackendSession, FindOptions, StoreBackend, StoreBackendBuilder, UpdateOptions,
        UpdateOutcome,
    },
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// A driver session, tracking whether it carries a transaction.
pub struct MongoDbSession {
    inner: ClientSession,
    in_transaction: bool,
}

impl MongoDbSession {
    fn new(inner: ClientSession) -> Self {
        Self { inner, in_transaction: false }
    }
}

#[async_trait]
impl BackendSession for MongoDbSession {
    async fn start_transaction(&mut self) -> DocumentStoreResult<()> {
        self.inner
            .start_transaction()
            .await
            .map_err(DocumentStoreError::backend)?;
        self.in_transaction = true;

        Ok(())
    }

    async fn commit_transaction(&mut self) -> DocumentStoreResult<()> {
        self.inner
            .commit_transaction()
            .await
            .map_err(DocumentStoreError::backend)?;
        self.in_transaction = false;

        Ok(())
    }

    async fn abort_transaction(&mut self) -> DocumentStoreResult<()> {
        self.in_transaction = false;
        self.inner
            .abort_transaction()
            .await
            .map_err(DocumentStoreError::backend)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

fn find_options(options: FindOptions) -> MongoFindOptions {
    let mut mongo_options = MongoFindOptions::default();

    mongo_options.sort = options.sort.map(|sort| sort.to_document());
    mongo_options.limit = options.limit.map(|limit| limit as i64);
    mongo_options.skip = options.skip.map(|skip| skip as u64);
    mongo_options.projection = options.projection;

    mongo_options
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Session = MongoDbSession;

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn start_session(&self) -> DocumentStoreResult<Self::Session> {
        Ok(MongoDbSession::new(
            self.client
                .start_session()
                .await
                .map_err(DocumentStoreError::backend)?,
        ))
    }

    async fn insert_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<Bson> {
        Ok(self
            .get_collection(collection)
            .insert_one(document)
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)?
            .inserted_id)
    }

    async fn find(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut cursor = self
            .get_collection(collection)
            .find(filter)
            .with_options(find_options(options))
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)?;

        cursor
            .stream(&mut session.inner)
            .try_collect::<Vec<Document>>()
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn count_documents(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn delete_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
    ) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_one(filter)
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)?
            .deleted_count)
    }

    async fn replace_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut options = ReplaceOptions::default();
        options.upsert = Some(upsert);

        let result = self
            .get_collection(collection)
            .replace_one(filter, replacement)
            .with_options(options)
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_one(
        &self,
        session: &mut Self::Session,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut mongo_options = MongoUpdateOptions::default();
        mongo_options.upsert = Some(options.upsert);
        mongo_options.array_filters = options.array_filters;

        let result = self
            .get_collection(collection)
            .update_one(filter, update)
            .with_options(mongo_options)
            .session(&mut session.inner)
            .await
            .map_err(DocumentStoreError::backend)?;

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(DocumentStoreError::backend)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    /// Takes the connection string and database from `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.connection_string, &config.database)
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        StoreConfig::new(&self.dsn, &self.database).validate()?;

        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
        )
        .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        info!(target: "docrepo::mongodb", database = %self.database, "MongoDB client created");

        Ok(MongoDbStore::new(client, self.database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrepo_core::query::Sort;

    #[test]
    fn find_options_are_translated() {
        let options = find_options(FindOptions {
            sort: Some(Sort::desc("_id")),
            limit: Some(5),
            skip: Some(2),
            projection: Some(bson::doc! { "_id": 1 }),
        });

        assert_eq!(options.sort, Some(bson::doc! { "_id": -1 }));
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.skip, Some(2));
        assert_eq!(options.projection, Some(bson::doc! { "_id": 1 }));
    }

    #[tokio::test]
    async fn blank_configuration_is_rejected_before_connecting() {
        let result = MongoDbStoreBuilder::from_config(&StoreConfig::new("", "app"))
            .build()
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Configuration(_))));
    }
}
