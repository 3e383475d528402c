mod common;

use bson::{Bson, doc};
use webdb::{memory::InMemoryTransport, prelude::*};

#[tokio::test]
async fn test_insert_assigns_identifiers() {
    for (mode, db) in common::both().await {
        let users = db.collection("users");

        let outcomes = users
            .insert(vec![Document::new().field("name", "A"), Document::new().field("name", "B")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2, "{mode}");
        assert!(outcomes.iter().all(BulkOutcome::is_ok), "{mode}");
        assert_ne!(outcomes[0].id, outcomes[1].id, "{mode}");

        let stored = users.get_by_id(&outcomes[0].id).await.unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&Bson::String("A".to_string())), "{mode}");
        assert_eq!(stored.rev(), outcomes[0].rev(), "{mode}");
    }
}

#[tokio::test]
async fn test_insert_drops_top_level_nulls_only() {
    let db = common::native();
    let users = db.collection("users");

    users
        .insert_one(
            Document::with_id("x")
                .field("a", 1)
                .field("b", Bson::Null)
                .field("nested", doc! { "c": Bson::Null }),
        )
        .await
        .unwrap();

    let stored = users.get_by_id("x").await.unwrap().unwrap();
    assert_eq!(stored.id(), Some("x"));
    assert!(stored.rev().is_some());
    assert_eq!(stored.get("a"), Some(&Bson::Int32(1)));
    assert!(!stored.contains_key("b"));
    assert_eq!(stored.get("nested"), Some(&Bson::Document(doc! { "c": Bson::Null })));
}

#[tokio::test]
async fn test_insert_duplicate_identifier_is_reported_per_document() {
    let db = common::native();
    let users = db.collection("users");

    users.insert(vec![Document::with_id("a")]).await.unwrap();
    let outcomes = users
        .insert(vec![Document::with_id("a"), Document::with_id("b")])
        .await
        .unwrap();

    assert!(matches!(outcomes[0].result, Err(WebDbError::Conflict(..))));
    assert!(outcomes[1].is_ok());

    let err = users.insert_one(Document::with_id("b")).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_timestamps_are_stored_as_millis() {
    for (mode, db) in common::both().await {
        let events = db.collection("events");
        events
            .insert(vec![
                Document::with_id("early").field("at", bson::DateTime::from_millis(1_000)),
                Document::with_id("late").field("at", bson::DateTime::from_millis(3_000)),
            ])
            .await
            .unwrap();

        let early = events.get_by_id("early").await.unwrap().unwrap();
        assert_eq!(early.get("at"), Some(&Bson::Int64(1_000)), "{mode}");

        let after = events
            .count(Filter::gt("at", bson::DateTime::from_millis(2_000)))
            .await
            .unwrap();
        assert_eq!(after, 1, "{mode}");
    }
}

#[tokio::test]
async fn test_get_honors_sort_and_skip() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert(common::numbered(1..=3)).await.unwrap();

        let highest = items
            .get(Query::all(), FindOptions::new().sort(SortSpec::new().desc("n")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(highest.get("n"), Some(&Bson::Int32(3)), "{mode}");

        let second = items
            .get(Query::all(), FindOptions::new().sort(SortSpec::new().asc("n")).skip(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.get("n"), Some(&Bson::Int32(2)), "{mode}");

        let missing = items.get(Filter::eq("b", 1), FindOptions::new()).await.unwrap();
        assert!(missing.is_none(), "{mode}");
    }
}

#[tokio::test]
async fn test_get_by_identifier_query() {
    let db = common::native();
    let items = db.collection("items");
    items.insert(common::numbered(1..=3)).await.unwrap();

    let found = items
        .get(Filter::eq("id", "doc-2"), FindOptions::new().fields(["n"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id(), Some("doc-2"));
    assert_eq!(found.get("n"), Some(&Bson::Int32(2)));

    let absent = items.get(Filter::eq("id", "doc-9"), FindOptions::new()).await.unwrap();
    assert!(absent.is_none());
}

#[tokio::test]
async fn test_list_with_skip_and_limit() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert(common::numbered(1..=3)).await.unwrap();

        let page = items
            .list(
                Query::all(),
                FindOptions::new().sort(SortSpec::new().asc("n")).skip(1).limit(1),
            )
            .await
            .unwrap();
        assert_eq!(common::ints(&page, "n"), vec![2], "{mode}");

        let all = items.list(Query::all(), FindOptions::new()).await.unwrap();
        assert_eq!(all.len(), 3, "{mode}");
    }
}

#[tokio::test]
async fn test_sort_breaks_ties_by_identifier() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![
                Document::with_id("b").field("g", 1),
                Document::with_id("a").field("g", 1),
                Document::with_id("c").field("g", 0),
            ])
            .await
            .unwrap();

        let ascending = items
            .list(Query::all(), FindOptions::new().sort(doc! { "g": 1 }))
            .await
            .unwrap();
        let ids: Vec<_> = ascending.iter().filter_map(Document::id).collect();
        assert_eq!(ids, vec!["c", "a", "b"], "{mode}");

        let descending = items
            .list(Query::all(), FindOptions::new().sort(doc! { "g": "desc" }))
            .await
            .unwrap();
        let ids: Vec<_> = descending.iter().filter_map(Document::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"], "{mode}");
    }
}

#[tokio::test]
async fn test_invalid_sort_direction_is_rejected() {
    let db = common::native();
    let items = db.collection("items");

    let err = items
        .list(Query::all(), FindOptions::new().sort(doc! { "n": true }))
        .await
        .unwrap_err();
    assert!(matches!(err, WebDbError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_projection_keeps_identifier() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert_one(Document::with_id("p").field("a", 1).field("b", 2))
            .await
            .unwrap();

        let projected = items
            .list(Query::all(), FindOptions::new().fields(["a"]))
            .await
            .unwrap();
        assert_eq!(projected.len(), 1, "{mode}");

        let keys: Vec<_> = projected[0].fields().keys().collect();
        assert_eq!(keys, vec!["a"], "{mode}");
        assert_eq!(projected[0].id(), Some("p"), "{mode}");
        assert!(projected[0].rev().is_some(), "{mode}");
    }
}

#[tokio::test]
async fn test_hidden_revisions() {
    let db = Database::with_config(
        InMemoryTransport::new(),
        DatabaseConfig::new().revisions(RevisionMode::Hide),
    );
    let items = db.collection("items");
    items.insert_one(Document::with_id("h").field("a", 1)).await.unwrap();

    let stored = items.get_by_id("h").await.unwrap().unwrap();
    assert_eq!(stored.id(), Some("h"));
    assert!(stored.rev().is_none());
}

#[tokio::test]
async fn test_count_only_counts_matches() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![
                Document::new().field("a", 1),
                Document::new().field("a", 1),
                Document::new().field("a", 2),
            ])
            .await
            .unwrap();

        assert_eq!(items.count(Filter::eq("a", 1)).await.unwrap(), 2, "{mode}");
        assert_eq!(items.count(Query::all()).await.unwrap(), 3, "{mode}");
    }
}

#[tokio::test]
async fn test_update_removal_sentinel_versus_null() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert_one(Document::with_id("p").field("a", 1).field("b", 2))
            .await
            .unwrap();

        let affected = items
            .update(Filter::eq("id", "p"), Patch::new().remove("b"))
            .await
            .unwrap();
        assert_eq!(affected.count, 1, "{mode}");
        assert!(affected.is_complete(), "{mode}");

        let removed = items.get_by_id("p").await.unwrap().unwrap();
        assert_eq!(*removed.fields(), doc! { "a": 1 }, "{mode}");

        items
            .update(Filter::eq("id", "p"), Patch::new().set("b", Bson::Null))
            .await
            .unwrap();

        let nulled = items.get_by_id("p").await.unwrap().unwrap();
        assert_eq!(*nulled.fields(), doc! { "a": 1, "b": Bson::Null }, "{mode}");
    }
}

#[tokio::test]
async fn test_empty_update_keeps_fields() {
    let db = common::native();
    let items = db.collection("items");
    items
        .insert_one(Document::with_id("p").field("a", 1).field("b", 2))
        .await
        .unwrap();
    let before = items.get_by_id("p").await.unwrap().unwrap();

    let affected = items.update(Query::all(), Patch::new()).await.unwrap();
    assert_eq!(affected.count, 1);

    let after = items.get_by_id("p").await.unwrap().unwrap();
    assert_eq!(after.fields(), before.fields());
    assert_ne!(after.rev(), before.rev());
}

#[tokio::test]
async fn test_update_touches_every_match() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert(common::numbered(1..=4)).await.unwrap();

        let affected = items
            .update(Filter::gt("n", 2), Patch::new().set("big", true))
            .await
            .unwrap();
        assert_eq!(affected.count, 2, "{mode}");
        assert_eq!(items.count(Filter::eq("big", true)).await.unwrap(), 2, "{mode}");
    }
}

#[tokio::test]
async fn test_remove() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");

        let nothing = items.remove(Query::all()).await.unwrap();
        assert_eq!(nothing.count, 0, "{mode}");

        items.insert(common::numbered(1..=3)).await.unwrap();
        let removed = items.remove(Filter::lt("n", 3)).await.unwrap();
        assert_eq!(removed.count, 2, "{mode}");
        assert_eq!(items.count(Query::all()).await.unwrap(), 1, "{mode}");

        let cleared = items.delete(Query::all()).await.unwrap();
        assert_eq!(cleared.count, 1, "{mode}");
        assert_eq!(items.count(Query::all()).await.unwrap(), 0, "{mode}");
    }
}

#[tokio::test]
async fn test_drop_then_use_recreates_empty_collection() {
    let db = common::native();
    let items = db.collection("items");
    items.insert(common::numbered(1..=3)).await.unwrap();
    assert!(items.is_ready());

    items.drop().await.unwrap();
    assert!(!items.is_ready());

    let after = items.list(Query::all(), FindOptions::new()).await.unwrap();
    assert!(after.is_empty());
    assert!(items.is_ready());

    // Dropping twice is fine.
    items.drop().await.unwrap();
    items.drop().await.unwrap();
}

#[tokio::test]
async fn test_dump_returns_every_live_document() {
    let db = common::native();
    let items = db.collection("items");
    items.insert(common::numbered(1..=3)).await.unwrap();
    items.remove(Filter::eq("n", 2)).await.unwrap();

    let dumped = items.dump().await.unwrap();
    let ids: Vec<_> = dumped.iter().filter_map(Document::id).collect();
    assert_eq!(ids, vec!["doc-1", "doc-3"]);
}

#[tokio::test]
async fn test_typed_records() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct User {
        id: String,
        name: String,
        age: i32,
    }

    let db = common::native();
    let users = db.collection("users");

    let alice = User { id: "alice".to_string(), name: "Alice".to_string(), age: 30 };
    users.insert_one(Document::from_record(&alice).unwrap()).await.unwrap();

    let stored = users.get_by_id("alice").await.unwrap().unwrap();
    assert_eq!(stored.to_record::<User>().unwrap(), alice);
}

#[tokio::test]
async fn test_listed_documents_copy_into_another_collection() {
    for (mode, db) in common::both().await {
        let source = db.collection("a");
        source.insert(common::numbered(1..=3)).await.unwrap();
        let listed = source.list(Query::all(), FindOptions::new()).await.unwrap();
        assert!(listed.iter().all(|doc| doc.rev().is_some()), "{mode}");

        let copies = db.collection("b");
        let outcomes = copies.insert(listed.clone()).await.unwrap();
        assert!(outcomes.iter().all(BulkOutcome::is_ok), "{mode}: {outcomes:?}");
        assert_eq!(copies.count(Query::all()).await.unwrap(), 3, "{mode}");

        let singles = db.collection("c");
        for doc in listed.iter().cloned() {
            let created = singles.set(doc).await.unwrap();
            assert!(matches!(created, SetOutcome::Created(_)), "{mode}: {created:?}");
        }
        singles.insert_one(Document::with_id("extra")).await.unwrap();
        assert_eq!(singles.count(Query::all()).await.unwrap(), 4, "{mode}");
    }
}

#[tokio::test]
async fn test_reserved_field_names_are_rejected() {
    let db = common::native();
    let items = db.collection("items");

    let err = items
        .insert_one(Document::with_id("a").field("_tag", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, WebDbError::InvalidDocument(_)));

    let err = items
        .insert(vec![Document::with_id("b").field("id", 7)])
        .await
        .unwrap_err();
    assert!(matches!(err, WebDbError::InvalidDocument(_)));

    assert_eq!(items.count(Query::all()).await.unwrap(), 0);
}
