//! Storage transport abstraction.
//!
//! A [`Transport`] is whatever actually stores documents: a remote CouchDB-style
//! server, an embedded engine, or the in-memory transport used in tests. Collections
//! only ever talk to storage through this trait.
//!
//! # Overview
//!
//! Transports deal in stored documents (`bson::Document` with `_id`/`_rev`), Mango
//! selectors and opaque continuation tokens ("bookmarks"). Everything caller-facing
//! (public documents, patches, query builders) lives above this layer.
//!
//! # Example
//!
//! ```ignore
//! use webdb_core::transport::{Transport, FindRequest};
//! use bson::doc;
//!
//! let page = transport
//!     .find("users", FindRequest::new(doc! { "age": { "$gte": 18 } }).limit(50))
//!     .await?;
//! for stored in page.docs {
//!     println!("{}", stored.get_str("_id")?);
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt::Debug, sync::Arc};

use crate::{
    error::{WebDbError, WebDbResult},
    normalize::Capabilities,
    query::Sort,
};

/// Identifier and revision assigned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub id: String,
    pub rev: String,
}

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create, or update when the document carries the current `_rev`.
    Put(bson::Document),
    /// Tombstone the document at the given revision.
    Delete { id: String, rev: String },
}

impl WriteOp {
    /// The identifier this operation targets, if it has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteOp::Put(document) => document.get_str("_id").ok(),
            WriteOp::Delete { id, .. } => Some(id),
        }
    }
}

/// Result of one operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub id: String,
    /// The new revision, or why this document was not written.
    pub result: Result<String, WebDbError>,
}

impl BulkOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn rev(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }
}

/// A single page request against a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    /// Mango selector. Empty matches everything.
    pub selector: bson::Document,
    /// Sort keys in precedence order. Transports break remaining ties on `_id`.
    pub sort: Vec<Sort>,
    /// Maximum documents in this page.
    pub limit: usize,
    /// Stored field names to return; `None` returns whole documents.
    pub fields: Option<Vec<String>>,
    /// Continuation token from the previous page.
    pub bookmark: Option<String>,
}

impl FindRequest {
    pub fn new(selector: bson::Document) -> Self {
        FindRequest {
            selector,
            limit: crate::config::DEFAULT_SCAN_PAGE_SIZE,
            ..FindRequest::default()
        }
    }

    pub fn sort(mut self, sort: Vec<Sort>) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn fields(mut self, fields: Option<Vec<String>>) -> Self {
        self.fields = fields;
        self
    }

    pub fn bookmark(mut self, bookmark: Option<String>) -> Self {
        self.bookmark = bookmark;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResponse {
    pub docs: Vec<bson::Document>,
    /// Token resuming after the last document of this page.
    pub bookmark: Option<String>,
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub name: Option<String>,
    /// Index type; `"json"` unless the transport supports others.
    pub kind: String,
}

impl IndexSpec {
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        IndexSpec {
            fields: fields.into_iter().map(Into::into).collect(),
            name: None,
            kind: "json".to_string(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parses a Mango index definition: `{ index: { fields: [...] }, name?, type? }`.
    ///
    /// Field entries may be names or single-key `{name: direction}` documents.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] if the definition is malformed.
    pub fn from_document(definition: &bson::Document) -> WebDbResult<Self> {
        let invalid = |reason: &str| WebDbError::InvalidQuery(format!("invalid index: {reason}"));

        let fields = definition
            .get_document("index")
            .map_err(|_| invalid("missing index document"))?
            .get_array("fields")
            .map_err(|_| invalid("index.fields must be a list"))?
            .iter()
            .map(|field| match field {
                bson::Bson::String(name) => Ok(name.clone()),
                bson::Bson::Document(keyed) if keyed.len() == 1 => keyed
                    .keys()
                    .next()
                    .cloned()
                    .ok_or_else(|| invalid("empty field entry")),
                _ => Err(invalid("field entries must be names")),
            })
            .collect::<WebDbResult<Vec<_>>>()?;

        let mut spec = IndexSpec::new(fields);
        if let Ok(name) = definition.get_str("name") {
            spec.name = Some(name.to_string());
        }
        if let Ok(kind) = definition.get_str("type") {
            spec.kind = kind.to_string();
        }

        spec.validate()?;
        Ok(spec)
    }

    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] for an empty field list or empty names.
    pub fn validate(&self) -> WebDbResult<()> {
        if self.fields.is_empty() {
            return Err(WebDbError::InvalidQuery("index needs at least one field".to_string()));
        }
        if self.fields.iter().any(|field| field.is_empty()) {
            return Err(WebDbError::InvalidQuery("index field names must not be empty".to_string()));
        }
        if self.name.as_deref().is_some_and(str::is_empty) || self.kind.is_empty() {
            return Err(WebDbError::InvalidQuery("index name and type must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created { name: String },
    /// An identical index was already defined.
    Exists { name: String },
}

impl IndexOutcome {
    pub fn name(&self) -> &str {
        match self {
            IndexOutcome::Created { name } | IndexOutcome::Exists { name } => name,
        }
    }
}

/// Storage statistics for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub doc_count: u64,
    pub deleted_count: u64,
    pub update_seq: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Abstract interface for document storage transports.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one transport is shared by every collection
/// of a [`Database`](crate::database::Database).
///
/// # Error Handling
///
/// Transports report missing collections as [`WebDbError::CollectionNotFound`], missing
/// documents as [`WebDbError::DocumentNotFound`] and stale revisions as
/// [`WebDbError::Conflict`]. Anything else is [`WebDbError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Operators this transport evaluates natively in `find` selectors.
    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    /// Returns `true` if the collection exists.
    async fn collection_exists(&self, name: &str) -> WebDbResult<bool>;

    /// Creates an empty collection.
    ///
    /// # Errors
    ///
    /// [`WebDbError::CollectionAlreadyExists`] if it exists already.
    async fn create_collection(&self, name: &str) -> WebDbResult<()>;

    /// Deletes a collection and all of its documents.
    ///
    /// # Errors
    ///
    /// [`WebDbError::CollectionNotFound`] if it does not exist.
    async fn destroy_collection(&self, name: &str) -> WebDbResult<()>;

    async fn list_collections(&self) -> WebDbResult<Vec<String>>;

    /// Reads one stored document by identifier.
    ///
    /// # Errors
    ///
    /// [`WebDbError::DocumentNotFound`] if it does not exist (or was deleted).
    async fn get_document(&self, collection: &str, id: &str) -> WebDbResult<bson::Document>;

    /// Creates or updates one document.
    ///
    /// Updating an existing document requires its current `_rev`.
    ///
    /// # Errors
    ///
    /// [`WebDbError::Conflict`] on a stale or missing revision.
    async fn put_document(
        &self,
        collection: &str,
        document: bson::Document,
    ) -> WebDbResult<WriteReceipt>;

    /// Applies several writes, reporting one outcome per operation in input order.
    ///
    /// Not atomic: individual operations may fail while others succeed.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
    ) -> WebDbResult<Vec<BulkOutcome>>;

    /// Returns one page of documents matching a selector.
    async fn find(&self, collection: &str, request: FindRequest) -> WebDbResult<FindResponse>;

    /// Returns every live document, in identifier order.
    async fn list_all(&self, collection: &str) -> WebDbResult<Vec<bson::Document>>;

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> WebDbResult<IndexOutcome>;

    /// Reclaims space held by deleted documents and old revisions.
    async fn compact(&self, collection: &str) -> WebDbResult<()>;

    async fn collection_info(&self, collection: &str) -> WebDbResult<CollectionInfo>;

    /// Releases connections and other resources. The default does nothing.
    async fn shutdown(&self) -> WebDbResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    async fn collection_exists(&self, name: &str) -> WebDbResult<bool> {
        (**self).collection_exists(name).await
    }

    async fn create_collection(&self, name: &str) -> WebDbResult<()> {
        (**self).create_collection(name).await
    }

    async fn destroy_collection(&self, name: &str) -> WebDbResult<()> {
        (**self).destroy_collection(name).await
    }

    async fn list_collections(&self) -> WebDbResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn get_document(&self, collection: &str, id: &str) -> WebDbResult<bson::Document> {
        (**self).get_document(collection, id).await
    }

    async fn put_document(
        &self,
        collection: &str,
        document: bson::Document,
    ) -> WebDbResult<WriteReceipt> {
        (**self).put_document(collection, document).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
    ) -> WebDbResult<Vec<BulkOutcome>> {
        (**self).bulk_write(collection, operations).await
    }

    async fn find(&self, collection: &str, request: FindRequest) -> WebDbResult<FindResponse> {
        (**self).find(collection, request).await
    }

    async fn list_all(&self, collection: &str) -> WebDbResult<Vec<bson::Document>> {
        (**self).list_all(collection).await
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> WebDbResult<IndexOutcome> {
        (**self).create_index(collection, spec).await
    }

    async fn compact(&self, collection: &str) -> WebDbResult<()> {
        (**self).compact(collection).await
    }

    async fn collection_info(&self, collection: &str) -> WebDbResult<CollectionInfo> {
        (**self).collection_info(collection).await
    }

    async fn shutdown(&self) -> WebDbResult<()> {
        (**self).shutdown().await
    }
}

/// Factory trait for creating transport instances.
#[async_trait]
pub trait TransportBuilder {
    type Transport: Transport;

    /// # Errors
    ///
    /// Returns an error if the transport cannot be initialized (bad configuration,
    /// unreachable server, ...).
    async fn build(self) -> WebDbResult<Self::Transport>;
}
