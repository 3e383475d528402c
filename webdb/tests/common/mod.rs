#![allow(dead_code)]

use bson::Bson;
use webdb::{memory::InMemoryTransport, prelude::*};

/// A database whose transport evaluates every selector itself.
pub fn native() -> Database<InMemoryTransport> {
    Database::new(InMemoryTransport::new())
}

/// A database whose transport evaluates nothing, so every query runs through the matcher.
pub async fn local() -> Database<InMemoryTransport> {
    let transport = InMemoryTransport::builder()
        .capabilities(Capabilities::none())
        .build()
        .await
        .unwrap();
    Database::new(transport)
}

/// Both evaluation modes, labelled for assertion messages.
pub async fn both() -> Vec<(&'static str, Database<InMemoryTransport>)> {
    vec![("native", native()), ("local", local().await)]
}

pub fn ints(docs: &[Document], field: &str) -> Vec<i32> {
    docs.iter()
        .filter_map(|doc| doc.get(field).and_then(Bson::as_i32))
        .collect()
}

pub fn numbered(range: std::ops::RangeInclusive<i32>) -> Vec<Document> {
    range
        .map(|n| Document::with_id(format!("doc-{n}")).field("n", n))
        .collect()
}
