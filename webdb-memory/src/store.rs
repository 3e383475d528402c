//! In-memory transport implementation.
//!
//! Documents live in per-collection ordered maps behind an async-aware read-write lock.
//! Writes follow the usual revision rules: updating or deleting a document requires its
//! current `_rev`, and deletes leave tombstones until the collection is compacted.

use async_trait::async_trait;
use bson::Bson;
use chrono::{DateTime, Utc};
use mea::rwlock::RwLock;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use uuid::Uuid;

use webdb_core::{
    codec::{DELETED_KEY, ID_KEY, REV_KEY},
    error::{WebDbError, WebDbResult},
    matcher::{Matcher, collate, lookup},
    normalize::Capabilities,
    query::{Query, Sort, SortDirection},
    transport::{
        BulkOutcome, CollectionInfo, FindRequest, FindResponse, IndexOutcome, IndexSpec,
        Transport, TransportBuilder, WriteOp, WriteReceipt,
    },
};

#[derive(Debug, Clone)]
struct Revision {
    rev: String,
    body: bson::Document,
    deleted: bool,
}

#[derive(Debug)]
struct MemoryCollection {
    docs: BTreeMap<String, Revision>,
    indexes: Vec<(String, IndexSpec)>,
    update_seq: u64,
    created_at: DateTime<Utc>,
}

impl MemoryCollection {
    fn new() -> Self {
        MemoryCollection {
            docs: BTreeMap::new(),
            indexes: Vec::new(),
            update_seq: 0,
            created_at: Utc::now(),
        }
    }

    fn live(&self) -> impl Iterator<Item = &bson::Document> {
        self.docs
            .values()
            .filter(|revision| !revision.deleted)
            .map(|revision| &revision.body)
    }

    fn put(&mut self, collection: &str, mut document: bson::Document) -> WebDbResult<WriteReceipt> {
        let id = document
            .get_str(ID_KEY)
            .map_err(|_| WebDbError::InvalidDocument("document has no string _id".to_string()))?
            .to_string();
        let supplied = document.get_str(REV_KEY).ok().map(str::to_string);

        let generation = match self.docs.get(&id) {
            Some(current) if !current.deleted => {
                if supplied.as_deref() != Some(current.rev.as_str()) {
                    return Err(WebDbError::Conflict(id, collection.to_string()));
                }
                generation_of(&current.rev)
            }
            Some(tombstone) => generation_of(&tombstone.rev),
            None if supplied.is_some() => {
                return Err(WebDbError::Conflict(id, collection.to_string()));
            }
            None => 0,
        };

        let rev = next_rev(generation);
        document.insert(REV_KEY, rev.clone());
        document.remove(DELETED_KEY);

        self.update_seq += 1;
        self.docs.insert(id.clone(), Revision { rev: rev.clone(), body: document, deleted: false });

        Ok(WriteReceipt { id, rev })
    }

    fn delete(&mut self, collection: &str, id: &str, rev: &str) -> WebDbResult<String> {
        let current = match self.docs.get(id) {
            Some(current) if !current.deleted => current,
            _ => return Err(WebDbError::DocumentNotFound(id.to_string(), collection.to_string())),
        };
        if current.rev != rev {
            return Err(WebDbError::Conflict(id.to_string(), collection.to_string()));
        }

        let next = next_rev(generation_of(&current.rev));
        let mut body = bson::Document::new();
        body.insert(ID_KEY, id);
        body.insert(REV_KEY, next.clone());
        body.insert(DELETED_KEY, true);

        self.update_seq += 1;
        self.docs.insert(id.to_string(), Revision { rev: next.clone(), body, deleted: true });

        Ok(next)
    }
}

fn generation_of(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn next_rev(generation: u64) -> String {
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

type CollectionMap = HashMap<String, MemoryCollection>;

/// Thread-safe in-memory document transport.
///
/// `InMemoryTransport` is cloneable; clones share the same underlying data.
///
/// `find` evaluates selectors with the core [`Matcher`], sorts with the core collation
/// order (ties broken by `_id`) and pages with opaque bookmarks. The advertised
/// [`Capabilities`] can be narrowed through the builder to exercise local evaluation.
///
/// # Example
///
/// ```ignore
/// use webdb_memory::InMemoryTransport;
/// use webdb_core::transport::Transport;
/// use bson::doc;
///
/// let transport = InMemoryTransport::new();
/// transport.create_collection("users").await?;
/// transport.put_document("users", doc! { "_id": "alice", "age": 30 }).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    collections: Arc<RwLock<CollectionMap>>,
    capabilities: Capabilities,
}

impl InMemoryTransport {
    /// Creates an empty transport that evaluates every operator natively.
    pub fn new() -> Self {
        InMemoryTransport::default()
    }

    pub fn builder() -> InMemoryTransportBuilder {
        InMemoryTransportBuilder::default()
    }
}

fn missing(collection: &str) -> WebDbError {
    WebDbError::CollectionNotFound(collection.to_string())
}

fn compare_by(a: &bson::Document, b: &bson::Document, sort: &[Sort]) -> Ordering {
    for key in sort {
        let ordering = collate(lookup(a, &key.field), lookup(b, &key.field));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    collate(a.get(ID_KEY), b.get(ID_KEY))
}

/// Bookmark: the sort values and identifier of the last document handed out.
fn encode_bookmark(last: &bson::Document, sort: &[Sort]) -> WebDbResult<String> {
    let values: Vec<Bson> = sort
        .iter()
        .map(|key| {
            let mut slot = bson::Document::new();
            if let Some(value) = lookup(last, &key.field) {
                slot.insert("v", value.clone());
            }
            Bson::Document(slot)
        })
        .collect();

    let mut position = bson::Document::new();
    position.insert("k", values);
    if let Some(id) = last.get(ID_KEY) {
        position.insert(ID_KEY, id.clone());
    }

    Ok(serde_json::to_string(&position)?)
}

fn decode_bookmark(bookmark: &str, sort: &[Sort]) -> WebDbResult<bson::Document> {
    let invalid = || WebDbError::InvalidQuery("invalid bookmark".to_string());
    let position: bson::Document = serde_json::from_str(bookmark).map_err(|_| invalid())?;
    let values = position.get_array("k").map_err(|_| invalid())?;
    if values.len() != sort.len() {
        return Err(invalid());
    }

    // Rebuild a pseudo-document so the regular comparator can be reused.
    let mut anchor = bson::Document::new();
    for (key, slot) in sort.iter().zip(values) {
        if let Some(value) = slot.as_document().and_then(|slot| slot.get("v")) {
            insert_path(&mut anchor, &key.field, value.clone());
        }
    }
    if let Some(id) = position.get(ID_KEY) {
        anchor.insert(ID_KEY, id.clone());
    }

    Ok(anchor)
}

fn insert_path(target: &mut bson::Document, path: &str, value: Bson) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if !matches!(target.get(head), Some(Bson::Document(_))) {
                target.insert(head, bson::Document::new());
            }
            if let Some(Bson::Document(child)) = target.get_mut(head) {
                insert_path(child, rest, value);
            }
        }
        None => {
            target.insert(path, value);
        }
    }
}

fn project(document: &bson::Document, fields: &[String]) -> bson::Document {
    let mut projected = bson::Document::new();
    for field in fields {
        if let Some(value) = document.get(field) {
            projected.insert(field.clone(), value.clone());
        }
    }
    projected
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn collection_exists(&self, name: &str) -> WebDbResult<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> WebDbResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(WebDbError::CollectionAlreadyExists(name.to_string()));
        }

        collections.insert(name.to_string(), MemoryCollection::new());
        tracing::debug!(collection = %name, "created in-memory collection");
        Ok(())
    }

    async fn destroy_collection(&self, name: &str) -> WebDbResult<()> {
        match self.collections.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(missing(name)),
        }
    }

    async fn list_collections(&self) -> WebDbResult<Vec<String>> {
        let mut names: Vec<_> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_document(&self, collection: &str, id: &str) -> WebDbResult<bson::Document> {
        let collections = self.collections.read().await;
        let docs = &collections.get(collection).ok_or_else(|| missing(collection))?.docs;

        match docs.get(id) {
            Some(revision) if !revision.deleted => Ok(revision.body.clone()),
            _ => Err(WebDbError::DocumentNotFound(id.to_string(), collection.to_string())),
        }
    }

    async fn put_document(
        &self,
        collection: &str,
        document: bson::Document,
    ) -> WebDbResult<WriteReceipt> {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?
            .put(collection, document)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
    ) -> WebDbResult<Vec<BulkOutcome>> {
        let mut collections = self.collections.write().await;
        let target = collections.get_mut(collection).ok_or_else(|| missing(collection))?;

        Ok(operations
            .into_iter()
            .map(|operation| {
                let id = operation.id().unwrap_or_default().to_string();
                let result = match operation {
                    WriteOp::Put(document) => target.put(collection, document).map(|r| r.rev),
                    WriteOp::Delete { id, rev } => target.delete(collection, &id, &rev),
                };
                BulkOutcome { id, result }
            })
            .collect())
    }

    async fn find(&self, collection: &str, request: FindRequest) -> WebDbResult<FindResponse> {
        let query = Query::from_document(&request.selector)?;
        let anchor = request
            .bookmark
            .as_deref()
            .map(|bookmark| decode_bookmark(bookmark, &request.sort))
            .transpose()?;

        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let mut matcher = Matcher::new();
        let mut hits: Vec<&bson::Document> = target
            .live()
            .filter(|document| matcher.matches(&query, document))
            .collect();
        hits.sort_by(|a, b| compare_by(a, b, &request.sort));

        let page: Vec<&bson::Document> = hits
            .into_iter()
            .filter(|document| match &anchor {
                Some(anchor) => compare_by(document, anchor, &request.sort) == Ordering::Greater,
                None => true,
            })
            .take(request.limit)
            .collect();

        let bookmark = match page.last() {
            Some(last) => Some(encode_bookmark(last, &request.sort)?),
            None => request.bookmark.clone(),
        };

        let docs = page
            .into_iter()
            .map(|document| match &request.fields {
                Some(fields) => project(document, fields),
                None => document.clone(),
            })
            .collect();

        Ok(FindResponse { docs, bookmark })
    }

    async fn list_all(&self, collection: &str) -> WebDbResult<Vec<bson::Document>> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(target.live().cloned().collect())
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> WebDbResult<IndexOutcome> {
        spec.validate()?;

        let mut collections = self.collections.write().await;
        let target = collections.get_mut(collection).ok_or_else(|| missing(collection))?;

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("idx-{}", spec.fields.join("-")));

        let exists = target
            .indexes
            .iter()
            .any(|(existing, defined)| *existing == name || defined.fields == spec.fields);
        if exists {
            return Ok(IndexOutcome::Exists { name });
        }

        target.indexes.push((name.clone(), spec));
        Ok(IndexOutcome::Created { name })
    }

    async fn compact(&self, collection: &str) -> WebDbResult<()> {
        let mut collections = self.collections.write().await;
        let target = collections.get_mut(collection).ok_or_else(|| missing(collection))?;

        let before = target.docs.len();
        target.docs.retain(|_, revision| !revision.deleted);
        tracing::debug!(
            collection = %collection,
            purged = before - target.docs.len(),
            "compacted in-memory collection"
        );
        Ok(())
    }

    async fn collection_info(&self, collection: &str) -> WebDbResult<CollectionInfo> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let deleted = target.docs.values().filter(|revision| revision.deleted).count();
        Ok(CollectionInfo {
            name: collection.to_string(),
            doc_count: (target.docs.len() - deleted) as u64,
            deleted_count: deleted as u64,
            update_seq: target.update_seq,
            created_at: Some(target.created_at),
        })
    }
}

/// Builder for constructing [`InMemoryTransport`] instances.
///
/// # Example
///
/// ```ignore
/// use webdb_memory::InMemoryTransport;
/// use webdb_core::{normalize::Capabilities, transport::TransportBuilder};
///
/// let transport = InMemoryTransport::builder()
///     .capabilities(Capabilities::none())
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTransportBuilder {
    capabilities: Option<Capabilities>,
}

impl InMemoryTransportBuilder {
    /// Overrides the operators advertised as native.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

#[async_trait]
impl TransportBuilder for InMemoryTransportBuilder {
    type Transport = InMemoryTransport;

    async fn build(self) -> WebDbResult<Self::Transport> {
        Ok(InMemoryTransport {
            collections: Arc::default(),
            capabilities: self.capabilities.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded(docs: Vec<bson::Document>) -> InMemoryTransport {
        let transport = InMemoryTransport::new();
        transport.create_collection("c").await.unwrap();
        for document in docs {
            transport.put_document("c", document).await.unwrap();
        }
        transport
    }

    fn ids(docs: &[bson::Document]) -> Vec<&str> {
        docs.iter().map(|d| d.get_str("_id").unwrap()).collect()
    }

    #[tokio::test]
    async fn create_twice_reports_already_exists() {
        let transport = InMemoryTransport::new();
        transport.create_collection("c").await.unwrap();

        assert_eq!(
            transport.create_collection("c").await,
            Err(WebDbError::CollectionAlreadyExists("c".into()))
        );
        assert!(transport.collection_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn updates_require_current_revision() {
        let transport = seeded(vec![]).await;
        let first = transport.put_document("c", doc! { "_id": "a", "n": 1 }).await.unwrap();
        assert!(first.rev.starts_with("1-"));

        let stale = transport.put_document("c", doc! { "_id": "a", "n": 2 }).await;
        assert_eq!(stale, Err(WebDbError::Conflict("a".into(), "c".into())));

        let second = transport
            .put_document("c", doc! { "_id": "a", "_rev": first.rev.clone(), "n": 2 })
            .await
            .unwrap();
        assert!(second.rev.starts_with("2-"));
    }

    #[tokio::test]
    async fn bulk_reports_per_document_outcomes() {
        let transport = seeded(vec![doc! { "_id": "a" }]).await;

        let outcomes = transport
            .bulk_write(
                "c",
                vec![
                    WriteOp::Put(doc! { "_id": "b" }),
                    WriteOp::Put(doc! { "_id": "a" }),
                    WriteOp::Delete { id: "zz".into(), rev: "1-x".into() },
                ],
            )
            .await
            .unwrap();

        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].result, Err(WebDbError::Conflict("a".into(), "c".into())));
        assert!(outcomes[2].result.as_ref().is_err_and(WebDbError::is_not_found));
    }

    #[tokio::test]
    async fn deletes_leave_tombstones_until_compaction() {
        let transport = seeded(vec![doc! { "_id": "a" }, doc! { "_id": "b" }]).await;
        let rev = transport.get_document("c", "a").await.unwrap().get_str("_rev").unwrap().to_string();

        transport
            .bulk_write("c", vec![WriteOp::Delete { id: "a".into(), rev }])
            .await
            .unwrap();

        assert!(transport.get_document("c", "a").await.unwrap_err().is_not_found());
        let info = transport.collection_info("c").await.unwrap();
        assert_eq!((info.doc_count, info.deleted_count), (1, 1));

        transport.compact("c").await.unwrap();
        let info = transport.collection_info("c").await.unwrap();
        assert_eq!((info.doc_count, info.deleted_count), (1, 0));
    }

    #[tokio::test]
    async fn find_pages_with_bookmarks_in_sort_order() {
        let transport = seeded(
            (0..5)
                .map(|n| doc! { "_id": format!("d{n}"), "rank": 4 - n })
                .collect(),
        )
        .await;
        let sort = vec![Sort { field: "rank".into(), direction: SortDirection::Asc }];

        let mut seen = Vec::new();
        let mut bookmark = None;
        loop {
            let request = FindRequest::new(doc! {})
                .sort(sort.clone())
                .limit(2)
                .bookmark(bookmark.clone());
            let page = transport.find("c", request).await.unwrap();
            if page.docs.is_empty() {
                break;
            }
            seen.extend(ids(&page.docs).into_iter().map(str::to_string));
            bookmark = page.bookmark;
        }

        assert_eq!(seen, vec!["d4", "d3", "d2", "d1", "d0"]);
    }

    #[tokio::test]
    async fn find_breaks_ties_by_identifier_and_projects() {
        let transport = seeded(vec![
            doc! { "_id": "b", "g": 1, "x": 1 },
            doc! { "_id": "a", "g": 1, "x": 2 },
            doc! { "_id": "c", "g": 0, "x": 3 },
        ])
        .await;

        let request = FindRequest::new(doc! { "g": { "$gte": 0 } })
            .sort(vec![Sort { field: "g".into(), direction: SortDirection::Desc }])
            .fields(Some(vec!["_id".into(), "x".into()]));
        let page = transport.find("c", request).await.unwrap();

        assert_eq!(ids(&page.docs), vec!["a", "b", "c"]);
        assert_eq!(page.docs[0], doc! { "_id": "a", "x": 2 });
    }

    #[tokio::test]
    async fn index_definitions_are_idempotent() {
        let transport = seeded(vec![]).await;

        let created = transport.create_index("c", IndexSpec::new(["name"])).await.unwrap();
        assert_eq!(created, IndexOutcome::Created { name: "idx-name".into() });

        let again = transport.create_index("c", IndexSpec::new(["name"])).await.unwrap();
        assert_eq!(again, IndexOutcome::Exists { name: "idx-name".into() });
    }

    #[tokio::test]
    async fn builder_narrows_capabilities() {
        let transport = InMemoryTransport::builder()
            .capabilities(Capabilities::none())
            .build()
            .await
            .unwrap();

        assert_eq!(transport.capabilities(), Capabilities::none());
    }

    #[tokio::test]
    async fn missing_collection_is_reported() {
        let transport = InMemoryTransport::new();
        assert!(transport.get_document("nope", "a").await.unwrap_err().is_not_found());
        assert!(transport.destroy_collection("nope").await.unwrap_err().is_not_found());
    }
}
