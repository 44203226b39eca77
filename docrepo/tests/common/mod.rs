#![allow(dead_code)]

use docrepo::{
    bson::Document,
    connection::ConnectionHandle,
    document::Entity,
    memory::InMemoryStore,
    repository::Repository,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

impl User {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            age,
            tags: Vec::new(),
            address: None,
        }
    }
}

impl Entity for User {
    fn collection_name() -> Option<&'static str> {
        Some("users")
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn connection(store: &InMemoryStore) -> ConnectionHandle<InMemoryStore> {
    ConnectionHandle::new(store.clone())
}

pub fn users(store: &InMemoryStore) -> Repository<InMemoryStore, User> {
    Repository::new(connection(store))
}

pub fn documents(store: &InMemoryStore, name: &str) -> Repository<InMemoryStore, Document> {
    Repository::with_collection(connection(store), name)
}
