mod common;

use bson::{Bson, doc};
use webdb::prelude::*;

fn selector(document: bson::Document) -> Query {
    Query::try_from(document).unwrap()
}

#[tokio::test]
async fn test_equality_requires_the_field() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert_one(Document::new().field("a", 1)).await.unwrap();

        assert!(items.get(selector(doc! { "a": 1 }), FindOptions::new()).await.unwrap().is_some(), "{mode}");
        assert!(items.get(selector(doc! { "b": 1 }), FindOptions::new()).await.unwrap().is_none(), "{mode}");
        assert!(items.get(selector(doc! { "a": "1" }), FindOptions::new()).await.unwrap().is_none(), "{mode}");
    }
}

#[tokio::test]
async fn test_ordered_comparisons() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.index(IndexSpec::new(["n"])).await.unwrap();
        items.insert(common::numbered(1..=3)).await.unwrap();

        assert_eq!(items.count(selector(doc! { "n": { "$gt": 1 } })).await.unwrap(), 2, "{mode}");
        assert_eq!(items.count(selector(doc! { "n": { "$gte": 2 } })).await.unwrap(), 2, "{mode}");
        assert_eq!(items.count(selector(doc! { "n": { "$lt": 3 } })).await.unwrap(), 2, "{mode}");
        assert_eq!(items.count(selector(doc! { "n": { "$lte": 2 } })).await.unwrap(), 2, "{mode}");

        // Mixed types have no order.
        assert_eq!(items.count(Filter::gt("n", "0")).await.unwrap(), 0, "{mode}");
    }
}

#[tokio::test]
async fn test_membership() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![Document::new().field("a", 1), Document::new().field("a", 2)])
            .await
            .unwrap();

        assert_eq!(items.count(selector(doc! { "a": { "$in": [2] } })).await.unwrap(), 1, "{mode}");
        assert_eq!(items.count(selector(doc! { "a": { "$nin": [1] } })).await.unwrap(), 1, "{mode}");

        // A non-list operand never matches.
        assert_eq!(items.count(selector(doc! { "a": { "$in": 2 } })).await.unwrap(), 0, "{mode}");
        assert_eq!(items.count(selector(doc! { "a": { "$nin": 1 } })).await.unwrap(), 0, "{mode}");

        let remaining = items.list(Filter::not_in("a", [1]), FindOptions::new()).await.unwrap();
        assert_eq!(common::ints(&remaining, "a"), vec![2], "{mode}");
    }
}

#[tokio::test]
async fn test_regex() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![
                Document::new().field("a", "abc"),
                Document::new().field("a", "def"),
                Document::new().field("a", 1),
            ])
            .await
            .unwrap();

        assert_eq!(items.count(Filter::regex("a", "^a")).await.unwrap(), 1, "{mode}");
        assert_eq!(items.count(selector(doc! { "a": { "$regex": "1" } })).await.unwrap(), 0, "{mode}");

        // A pattern that fails to compile matches nothing.
        assert_eq!(items.count(Filter::regex("a", "(")).await.unwrap(), 0, "{mode}");

        assert_eq!(items.count(Filter::regex("a", "(?i)^ABC")).await.unwrap(), 1, "{mode}");
    }
}

#[tokio::test]
async fn test_null_is_distinct_from_missing() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![Document::with_id("with").field("a", 0), Document::with_id("without")])
            .await
            .unwrap();
        items
            .update(Filter::eq("id", "with"), Patch::new().set("a", Bson::Null))
            .await
            .unwrap();

        let nulls = items.list(Filter::is("a", Bson::Null), FindOptions::new()).await.unwrap();
        assert_eq!(nulls.len(), 1, "{mode}");
        assert_eq!(nulls[0].id(), Some("with"), "{mode}");

        assert_eq!(items.count(selector(doc! { "a": { "$exists": true } })).await.unwrap(), 1, "{mode}");
        assert_eq!(items.count(selector(doc! { "a": { "$exists": false } })).await.unwrap(), 1, "{mode}");
        assert_eq!(items.count(Filter::ne("a", Bson::Null)).await.unwrap(), 1, "{mode}");
    }
}

#[tokio::test]
async fn test_logical_operators() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items
            .insert(vec![
                Document::with_id("x").field("a", 1).field("b", 1),
                Document::with_id("y").field("a", 1).field("b", 2),
                Document::with_id("z").field("a", 2),
            ])
            .await
            .unwrap();

        let and = selector(doc! { "$and": [{ "a": 1 }, { "b": 2 }] });
        assert_eq!(items.count(and).await.unwrap(), 1, "{mode}");

        let or = selector(doc! { "$or": [{ "a": 2 }, { "b": 1 }] });
        assert_eq!(items.count(or).await.unwrap(), 2, "{mode}");

        let not = selector(doc! { "$not": { "a": 1 } });
        assert_eq!(items.count(not).await.unwrap(), 1, "{mode}");

        let built = Query::builder()
            .filter(Filter::or([Filter::eq("b", 1), Filter::eq("b", 2)]))
            .filter(Filter::not(Filter::eq("id", "x")))
            .build();
        let found = items.list(built, FindOptions::new()).await.unwrap();
        let ids: Vec<_> = found.iter().filter_map(Document::id).collect();
        assert_eq!(ids, vec!["y"], "{mode}");
    }
}

#[tokio::test]
async fn test_unrecognized_operator_matches_nothing() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert_one(Document::new().field("a", 1)).await.unwrap();

        assert_eq!(items.count(selector(doc! { "a": { "$near": 1 } })).await.unwrap(), 0, "{mode}");
    }
}

#[tokio::test]
async fn test_dotted_paths() {
    for (mode, db) in common::both().await {
        let accounts = db.collection("accounts");
        accounts
            .insert(vec![
                Document::new().field("meta", doc! { "tier": "gold" }),
                Document::new().field("meta", doc! { "tier": "silver" }),
            ])
            .await
            .unwrap();

        assert_eq!(accounts.count(Filter::eq("meta.tier", "gold")).await.unwrap(), 1, "{mode}");

        let sorted = accounts
            .list(Query::all(), FindOptions::new().sort(SortSpec::new().desc("meta.tier")))
            .await
            .unwrap();
        let tiers: Vec<_> = sorted
            .iter()
            .filter_map(|account| account.get("meta")?.as_document()?.get_str("tier").ok())
            .collect();
        assert_eq!(tiers, vec!["silver", "gold"], "{mode}");
    }
}

#[tokio::test]
async fn test_empty_query_matches_everything() {
    for (mode, db) in common::both().await {
        let items = db.collection("items");
        items.insert(common::numbered(1..=4)).await.unwrap();

        assert_eq!(items.count(selector(doc! {})).await.unwrap(), 4, "{mode}");
        assert_eq!(items.count(Query::all()).await.unwrap(), 4, "{mode}");
    }
}

#[tokio::test]
async fn test_malformed_logical_operand_is_rejected() {
    let err = Query::try_from(doc! { "$and": { "a": 1 } }).unwrap_err();
    assert!(matches!(err, WebDbError::InvalidQuery(_)));
}
