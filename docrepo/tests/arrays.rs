mod common;

use docrepo::{
    bson::{Bson, bson, doc},
    cancel::CancellationToken,
    error::DocumentStoreError,
    memory::InMemoryStore,
    query::Filter,
};
use serde::Serialize;

use common::{User, connection, users};

async fn seeded(store: &InMemoryStore, document: docrepo::bson::Document) {
    connection(store)
        .insert_one("carts", document, &CancellationToken::new())
        .await
        .unwrap();
}

async fn stored(store: &InMemoryStore, path: &str) -> Option<Bson> {
    connection(store)
        .find_one("carts", Filter::id("1"), &CancellationToken::new())
        .await
        .unwrap()
        .and_then(|document| document.get(path).cloned())
}

#[tokio::test]
async fn push_creates_and_appends() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(&store, doc! { "_id": "1" }).await;

    assert!(conn.array_push("carts", Filter::id("1"), "items", bson!("a"), &cancel).await.unwrap());
    assert!(conn.array_push("carts", Filter::id("1"), "items", bson!("b"), &cancel).await.unwrap());
    assert!(!conn.array_push("carts", Filter::id("2"), "items", bson!("c"), &cancel).await.unwrap());

    assert_eq!(stored(&store, "items").await, Some(bson!(["a", "b"])));
}

#[tokio::test]
async fn set_replaces_by_position() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(&store, doc! { "_id": "1", "items": ["a", "b", "c"] }).await;

    assert!(conn.array_set("carts", Filter::id("1"), "items", 1, bson!("B"), &cancel).await.unwrap());
    assert!(!conn.array_set("carts", Filter::id("1"), "items", 1, bson!("B"), &cancel).await.unwrap());

    assert_eq!(stored(&store, "items").await, Some(bson!(["a", "B", "c"])));
}

#[tokio::test]
async fn update_targets_matching_elements() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(
        &store,
        doc! {
            "_id": "1",
            "items": [
                { "sku": "X", "qty": 1 },
                { "sku": "Y", "qty": 1 },
            ],
        },
    )
    .await;

    let updated = conn
        .array_update(
            "carts",
            Filter::id("1"),
            "items",
            bson!({ "sku": "X" }),
            bson!({ "sku": "X", "qty": 5 }),
            &cancel,
        )
        .await
        .unwrap();

    assert!(updated);
    assert_eq!(
        stored(&store, "items").await,
        Some(bson!([{ "sku": "X", "qty": 5 }, { "sku": "Y", "qty": 1 }]))
    );
}

#[tokio::test]
async fn pull_removes_every_match() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(
        &store,
        doc! {
            "_id": "1",
            "items": [{ "sku": "X" }, { "sku": "Y" }, { "sku": "X" }],
            "tags": ["a", "b", "a"],
        },
    )
    .await;

    assert!(conn.array_pull("carts", Filter::id("1"), "items", bson!({ "sku": "X" }), &cancel).await.unwrap());
    assert!(conn.array_pull("carts", Filter::id("1"), "tags", bson!("a"), &cancel).await.unwrap());
    assert!(!conn.array_pull("carts", Filter::id("1"), "tags", bson!("z"), &cancel).await.unwrap());

    assert_eq!(stored(&store, "items").await, Some(bson!([{ "sku": "Y" }])));
    assert_eq!(stored(&store, "tags").await, Some(bson!(["b"])));
}

#[tokio::test]
async fn remove_at_compacts_nulls() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(&store, doc! { "_id": "1", "items": ["a", Bson::Null, "b", "c"] }).await;

    assert!(conn.array_remove_at("carts", Filter::id("1"), "items", 2, &cancel).await.unwrap());

    assert_eq!(stored(&store, "items").await, Some(bson!(["a", "c"])));
}

#[tokio::test]
async fn replace_all_requires_an_existing_array() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);
    seeded(&store, doc! { "_id": "1", "items": ["a"], "title": "cart" }).await;

    assert!(conn
        .array_replace_all("carts", Filter::id("1"), "items", vec![bson!("x"), bson!("y")], &cancel)
        .await
        .unwrap());
    assert_eq!(stored(&store, "items").await, Some(bson!(["x", "y"])));

    assert!(matches!(
        conn.array_replace_all("carts", Filter::id("1"), "title", vec![], &cancel).await,
        Err(DocumentStoreError::InvalidOperation(_))
    ));
    assert!(matches!(
        conn.array_replace_all("carts", Filter::id("1"), "missing", vec![], &cancel).await,
        Err(DocumentStoreError::InvalidOperation(_))
    ));
    assert!(!conn
        .array_replace_all("carts", Filter::id("2"), "items", vec![], &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn blank_paths_are_rejected() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut conn = connection(&store);

    assert!(matches!(
        conn.array_push("carts", Filter::id("1"), " ", bson!("a"), &cancel).await,
        Err(DocumentStoreError::Validation(_))
    ));
}

#[derive(Serialize)]
struct Tag<'a> {
    label: &'a str,
}

#[tokio::test]
async fn typed_array_operations() {
    let store = InMemoryStore::new();
    let cancel = CancellationToken::new();
    let mut repo = users(&store);

    let id = repo.insert_one(&User::new("Ann", 20), None, &cancel).await.unwrap();

    assert!(repo.array_push(Filter::id(&id), "tags", "admin", &cancel).await.unwrap());
    assert!(repo.array_push(Filter::id(&id), "tags", "ops", &cancel).await.unwrap());
    assert!(repo.array_set(Filter::id(&id), "tags", 1, "dev", &cancel).await.unwrap());
    assert_eq!(
        repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap().tags,
        vec!["admin".to_string(), "dev".to_string()]
    );

    assert!(repo.array_pull(Filter::id(&id), "tags", "admin", &cancel).await.unwrap());
    assert!(repo.array_replace_all(Filter::id(&id), "tags", &["x", "y", "z"], &cancel).await.unwrap());
    assert!(repo.array_remove_at(Filter::id(&id), "tags", 0, &cancel).await.unwrap());
    assert_eq!(
        repo.find_one(Filter::id(&id), &cancel).await.unwrap().unwrap().tags,
        vec!["y".to_string(), "z".to_string()]
    );

    assert!(repo.array_push(Filter::id(&id), "labels", Tag { label: "red" }, &cancel).await.unwrap());
    assert!(repo
        .array_update(
            Filter::id(&id),
            "labels",
            doc! { "label": "red" },
            Tag { label: "blue" },
            &cancel,
        )
        .await
        .unwrap());

    let raw = connection(&store)
        .find_one("users", Filter::id(&id), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.get("labels"), Some(&bson!([{ "label": "blue" }])));
}
