mod common;

use docrepo::{
    bson::{Document, doc},
    cancel::CancellationToken,
    error::DocumentStoreError,
    memory::InMemoryStore,
    merge::MergeOptions,
    query::Filter,
};
use serde::Serialize;

use common::{Address, User, connection, documents, init_tracing, users};

#[tokio::test]
async fn ids_continue_from_the_largest_numeric_id() {
    init_tracing();
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    for name in ["Ann", "Bob", "Cid"] {
        repo.insert_one(&User::new(name, 20), None, &cancel).await.unwrap();
    }

    let id = repo.insert_one(&User::new("Dee", 20), None, &cancel).await.unwrap();

    assert_eq!(id, "4");
    assert_eq!(repo.count(doc! {}, &cancel).await.unwrap(), 4);
}

#[tokio::test]
async fn ids_compare_numerically_not_lexically() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    repo.insert_one(&User::new("Ann", 20), Some("9"), &cancel).await.unwrap();
    repo.insert_one(&User::new("Bob", 20), Some("10"), &cancel).await.unwrap();

    let id = repo.insert_one(&User::new("Cid", 20), None, &cancel).await.unwrap();

    assert_eq!(id, "11");
}

#[tokio::test]
async fn non_numeric_ids_restart_the_sequence() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    repo.insert_one(&User::new("Ann", 20), Some("abc"), &cancel).await.unwrap();

    let id = repo.insert_one(&User::new("Bob", 20), None, &cancel).await.unwrap();

    assert_eq!(id, "1");
}

#[tokio::test]
async fn carried_ids_are_kept() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let user = User { id: Some("u-7".to_string()), ..User::new("Ann", 20) };
    let id = repo.insert_one(&user, None, &cancel).await.unwrap();

    assert_eq!(id, "u-7");
    assert_eq!(repo.find_one(Filter::id("u-7"), &cancel).await.unwrap(), Some(user));
}

#[tokio::test]
async fn set_updates_keep_untouched_fields() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let user = User {
        tags: vec!["admin".to_string()],
        ..User::new("John", 20)
    };
    let id = repo.insert_one(&user, None, &cancel).await.unwrap();

    repo.update_one(Filter::id(&id), doc! { "$set": { "age": 30 } }, &cancel)
        .await
        .unwrap();

    let stored = repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap();
    assert_eq!(stored.name, "John");
    assert_eq!(stored.age, 30);
    assert_eq!(stored.tags, vec!["admin".to_string()]);
}

#[tokio::test]
async fn upsert_creates_missing_documents() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let outcome = repo
        .upsert(Filter::id("42"), &User::new("Eve", 41), MergeOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.matched_count, 0);

    let stored = repo.find_one(Filter::id("42"), &cancel).await.unwrap().unwrap();
    assert_eq!(stored.id.as_deref(), Some("42"));
    assert_eq!(stored.name, "Eve");

    repo.upsert(Filter::id("42"), &User::new("Eve", 42), MergeOptions::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(repo.count(doc! {}, &cancel).await.unwrap(), 1);
    assert_eq!(repo.find_one(Filter::id("42"), &cancel).await.unwrap().unwrap().age, 42);
}

#[derive(Serialize)]
struct CityChange {
    address: CityOnly,
}

#[derive(Serialize)]
struct CityOnly {
    city: String,
}

#[tokio::test]
async fn partial_updates_keep_nested_siblings() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let user = User {
        address: Some(Address { city: "Oslo".to_string(), zip: "0150".to_string() }),
        ..User::new("Ann", 20)
    };
    let id = repo.insert_one(&user, None, &cancel).await.unwrap();

    let modified = repo
        .update_some_props(
            Filter::id(&id),
            &CityChange { address: CityOnly { city: "Bergen".to_string() } },
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(modified, 1);

    let stored = repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap();
    assert_eq!(
        stored.address,
        Some(Address { city: "Bergen".to_string(), zip: "0150".to_string() })
    );
    assert_eq!(stored.name, "Ann");
}

#[tokio::test]
async fn empty_partial_updates_change_nothing() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let id = repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();

    let modified = repo
        .update_some_props(Filter::id(&id), &doc! { "_id": "other" }, &cancel)
        .await
        .unwrap();

    assert_eq!(modified, 0);
    assert!(repo.find_one(Filter::id(&id), &cancel).await.unwrap().is_some());
}

#[tokio::test]
async fn collection_name_must_resolve() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = docrepo::repository::Repository::<InMemoryStore, Document>::new(connection(&store));

    assert!(matches!(
        repo.init_collection(None),
        Err(DocumentStoreError::Validation(_))
    ));
    assert!(matches!(
        repo.count(doc! {}, &cancel).await,
        Err(DocumentStoreError::Validation(_))
    ));

    assert_eq!(repo.init_collection(Some("things")).unwrap().name(), "things");
    assert_eq!(repo.init_collection(Some("ignored")).unwrap().name(), "things");

    repo.insert_one(&doc! { "kind": "widget" }, None, &cancel).await.unwrap();
    assert_eq!(
        connection(&store).count("things", doc! {}, &cancel).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn undecodable_documents() {
    init_tracing();
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut raw = documents(&store, "users");

    raw.insert_one(&doc! { "name": "Ann", "age": 20 }, None, &cancel).await.unwrap();
    raw.insert_one(&doc! { "name": "Broken", "age": "old" }, None, &cancel).await.unwrap();

    let mut repo = users(&store);

    let found = repo.find(doc! {}, &cancel).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Ann");

    assert!(matches!(
        repo.find_one(Filter::id("2"), &cancel).await,
        Err(DocumentStoreError::Serialization(_))
    ));
}

#[tokio::test]
async fn field_selection_returns_partial_entities() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let user = User {
        tags: vec!["a".to_string()],
        ..User::new("Ann", 20)
    };
    repo.insert_one(&user, None, &cancel).await.unwrap();

    let found = repo
        .find_with_field_selection(doc! {}, ["name", "age"], &cancel)
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.as_deref(), Some("1"));
    assert_eq!(found[0].name, "Ann");
    assert!(found[0].tags.is_empty());
}

#[tokio::test]
async fn transactions_through_the_repository() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    repo.begin_transaction().await.unwrap();
    repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();
    repo.rollback_transaction().await.unwrap();

    assert_eq!(repo.count(doc! {}, &cancel).await.unwrap(), 0);

    repo.begin_transaction().await.unwrap();
    repo.insert_one(&User::new("Bob", 20), None, &cancel).await.unwrap();
    repo.commit_transaction().await.unwrap();

    assert_eq!(users(&store).count(doc! {}, &cancel).await.unwrap(), 1);
    assert!(matches!(
        repo.commit_transaction().await,
        Err(DocumentStoreError::TransactionNotStarted)
    ));
}

#[tokio::test]
async fn disposed_repositories_refuse_work() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();

    repo.dispose().await.unwrap();
    repo.dispose().await.unwrap();

    assert!(repo.is_disposed());
    assert!(repo.connection().is_disposed());
    assert!(matches!(
        repo.find(doc! {}, &cancel).await,
        Err(DocumentStoreError::Disposed)
    ));
    assert!(matches!(
        repo.begin_transaction().await,
        Err(DocumentStoreError::Disposed)
    ));
}

#[tokio::test]
async fn delete_removes_one_document() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let id = repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();

    assert_eq!(repo.delete_one(Filter::id(&id), &cancel).await.unwrap(), 1);
    assert!(repo.find_one(Filter::id(&id), &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn set_paths_address_array_slots() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let user = User {
        tags: vec!["a".to_string(), "b".to_string()],
        ..User::new("Ann", 20)
    };
    let id = repo.insert_one(&user, None, &cancel).await.unwrap();

    repo.update_one(Filter::id(&id), doc! { "$set": { "tags.0": "x" } }, &cancel)
        .await
        .unwrap();

    let stored = repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap();
    assert_eq!(stored.tags, vec!["x".to_string(), "b".to_string()]);

    assert!(matches!(
        repo.update_one(Filter::id(&id), doc! { "$set": { "tags.first": "y" } }, &cancel)
            .await,
        Err(DocumentStoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        repo.update_one(Filter::id(&id), doc! { "$set": { "name.first": "A" } }, &cancel)
            .await,
        Err(DocumentStoreError::InvalidOperation(_))
    ));

    let stored = repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap();
    assert_eq!(stored.name, "Ann");
    assert_eq!(stored.tags, vec!["x".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn unrenderable_filters_are_rejected() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();

    assert!(matches!(
        repo.delete_one(Filter::ends_with("name", 7), &cancel).await,
        Err(DocumentStoreError::Validation(_))
    ));
    assert!(matches!(
        repo.update_one(Filter::starts_with("name", 1), doc! { "age": 21 }, &cancel)
            .await,
        Err(DocumentStoreError::Validation(_))
    ));
    assert!(matches!(
        repo.array_push(Filter::contains("name", "A").and(Filter::ends_with("x", 0)), "tags", "t", &cancel)
            .await,
        Err(DocumentStoreError::Validation(_))
    ));

    assert_eq!(repo.count(doc! {}, &cancel).await.unwrap(), 1);
    assert_eq!(repo.count(Filter::starts_with("name", "an"), &cancel).await.unwrap(), 1);
}
