//! Collection handles.
//!
//! A [`Collection`] is a cheap, cloneable handle on one named collection. The backing
//! collection is created lazily: the first operation on any handle for that name
//! checks whether it exists and creates it when absent. Every operation waits for
//! that to finish.
//!
//! # Example
//!
//! ```ignore
//! use webdb_core::{document::{Document, Patch}, query::Filter};
//!
//! # async fn example(db: &webdb_core::database::Database<impl webdb_core::transport::Transport + 'static>) -> webdb_core::error::WebDbResult<()> {
//! let invoices = db.collection("invoices");
//!
//! invoices
//!     .insert(vec![Document::new().field("total", 120).field("paid", false)])
//!     .await?;
//!
//! let affected = invoices
//!     .update(Filter::is("paid", false), Patch::new().set("reminded", true))
//!     .await?;
//! # Ok(()) }
//! ```

use std::{future::Future, sync::Arc};

use crate::{
    codec::{self, ID_KEY, REV_KEY},
    config::DatabaseConfig,
    cursor::{BatchOptions, BatchSummary, Cursor, CursorSettings},
    document::{Document, Patch},
    error::{WebDbError, WebDbResult},
    lifecycle::Lifecycle,
    normalize::{FindOptions, normalize_fields, normalize_sort, plan_query},
    query::{Query, SortSpec},
    transport::{
        BulkOutcome, CollectionInfo, IndexOutcome, IndexSpec, Transport, WriteOp, WriteReceipt,
    },
};

/// Outcome of a mutation that touches every matching document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Affected {
    /// Documents actually written.
    pub count: usize,
    /// Per-document failures; writes are not atomic.
    pub failures: Vec<BulkOutcome>,
}

impl Affected {
    fn from_outcomes(collection: &str, operation: &'static str, outcomes: Vec<BulkOutcome>) -> Self {
        let (succeeded, failures): (Vec<_>, Vec<_>) =
            outcomes.into_iter().partition(BulkOutcome::is_ok);

        if !failures.is_empty() {
            tracing::warn!(
                collection,
                operation,
                written = succeeded.len(),
                failed = failures.len(),
                "bulk write partially failed"
            );
        }

        Affected { count: succeeded.len(), failures }
    }

    /// Returns `true` if every targeted document was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A handle on one named collection.
pub struct Collection<T> {
    name: String,
    transport: Arc<T>,
    lifecycle: Arc<Lifecycle>,
    config: Arc<DatabaseConfig>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            name: self.name.clone(),
            transport: Arc::clone(&self.transport),
            lifecycle: Arc::clone(&self.lifecycle),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

impl<T> Collection<T>
where
    T: Transport + 'static,
{
    pub(crate) fn new(
        name: String,
        transport: Arc<T>,
        lifecycle: Arc<Lifecycle>,
        config: Arc<DatabaseConfig>,
    ) -> Self {
        Collection { name, transport, lifecycle, config }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the backing collection is known to exist.
    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    /// Ensures the backing collection exists. Every operation calls this first.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the collection can be neither found nor created.
    pub async fn ready(&self) -> WebDbResult<()> {
        self.lifecycle.ensure_ready(Arc::clone(&self.transport)).await
    }

    /// Inserts documents, generating identifiers where missing.
    ///
    /// Top-level null fields are not stored and any revision a document carries is
    /// ignored. Outcomes come back in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if the write could not be issued at all. Individual documents
    /// that were rejected (for example, an identifier that already exists) are reported
    /// in their [`BulkOutcome`].
    pub async fn insert(
        &self,
        documents: impl IntoIterator<Item = Document>,
    ) -> WebDbResult<Vec<BulkOutcome>> {
        let operations = documents
            .into_iter()
            .map(|document| codec::to_new(&with_identifier(document)).map(WriteOp::Put))
            .collect::<WebDbResult<Vec<_>>>()?;

        if operations.is_empty() {
            return Ok(Vec::new());
        }

        self.ready().await?;
        let count = operations.len();
        let outcomes = self.transport.bulk_write(&self.name, operations).await?;
        tracing::debug!(collection = %self.name, count, "inserted documents");

        Ok(outcomes)
    }

    /// Inserts a single document.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Conflict`] if a document with the same identifier exists.
    pub async fn insert_one(&self, document: Document) -> WebDbResult<WriteReceipt> {
        let stored = codec::to_new(&with_identifier(document))?;
        self.ready().await?;
        self.transport.put_document(&self.name, stored).await
    }

    /// Reads one document by identifier.
    ///
    /// # Errors
    ///
    /// Returns transport failures; a missing document is `Ok(None)`.
    pub async fn get_by_id(&self, id: &str) -> WebDbResult<Option<Document>> {
        self.ready().await?;
        match self.read_stored(id).await? {
            Some(stored) => Ok(Some(codec::to_public(stored, self.config.revisions)?)),
            None => Ok(None),
        }
    }

    /// Returns the first document matching `query`, honoring sort, skip and fields.
    ///
    /// A query of exactly `{id: "<string>"}` without sort or skip reads the document
    /// directly instead of searching.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] for malformed options and propagates
    /// transport failures. No match is `Ok(None)`.
    pub async fn get(
        &self,
        query: impl Into<Query>,
        options: FindOptions,
    ) -> WebDbResult<Option<Document>> {
        let query = query.into();

        let direct = query.identifier_lookup().filter(|_| {
            options.skip == 0 && options.sort.as_ref().is_none_or(SortSpec::is_empty)
        });
        if let Some(id) = direct {
            self.ready().await?;
            let Some(stored) = self.read_stored(id).await? else {
                return Ok(None);
            };
            let fields = options
                .fields
                .as_ref()
                .and_then(|spec| normalize_fields(spec, self.config.revisions));
            let stored = match fields {
                Some(fields) => codec::project(stored, &fields),
                None => stored,
            };
            return Ok(Some(codec::to_public(stored, self.config.revisions)?));
        }

        let options = FindOptions { limit: Some(1), ..options };
        let mut cursor = self.find(query, options).await?;
        Ok(cursor.next_page().await?.and_then(|page| page.into_iter().next()))
    }

    /// Returns every document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] for malformed options and propagates
    /// transport failures.
    pub async fn list(
        &self,
        query: impl Into<Query>,
        options: FindOptions,
    ) -> WebDbResult<Vec<Document>> {
        self.find(query, options).await?.collect_all().await
    }

    /// Opens a cursor over the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] for malformed options and propagates
    /// initialization failures.
    pub async fn find(
        &self,
        query: impl Into<Query>,
        options: FindOptions,
    ) -> WebDbResult<Cursor<T>> {
        let fields = options
            .fields
            .as_ref()
            .and_then(|spec| normalize_fields(spec, self.config.revisions));

        self.open_cursor(
            &query.into(),
            self.config.scan_page_size,
            options.limit,
            options.skip,
            options.sort.as_ref(),
            fields,
        )
        .await
    }

    /// Counts the documents matching `query`.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn count(&self, query: impl Into<Query>) -> WebDbResult<usize> {
        let mut cursor = self
            .open_cursor(
                &query.into(),
                self.config.scan_page_size,
                None,
                0,
                None,
                Some(vec![ID_KEY.to_string()]),
            )
            .await?;

        let mut count = 0;
        while let Some(page) = cursor.next_raw_page().await? {
            count += page.len();
        }
        Ok(count)
    }

    /// Merges `patch` into every document matching `query` in one bulk write.
    ///
    /// # Errors
    ///
    /// Propagates transport failures. Per-document rejections are reported in
    /// [`Affected::failures`].
    pub async fn update(&self, query: impl Into<Query>, patch: Patch) -> WebDbResult<Affected> {
        let matches = self.scan(&query.into(), None).await?;
        if matches.is_empty() {
            return Ok(Affected::default());
        }

        let operations = matches
            .into_iter()
            .map(|mut stored| {
                codec::apply_patch(&mut stored, &patch);
                WriteOp::Put(stored)
            })
            .collect();

        let outcomes = self.transport.bulk_write(&self.name, operations).await?;
        Ok(Affected::from_outcomes(&self.name, "update", outcomes))
    }

    /// Stores `document` unless a document with its identifier already exists.
    ///
    /// Returns the stored document: the existing one untouched, or the new one with its
    /// assigned identifier and revision.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn create_if_absent(&self, document: Document) -> WebDbResult<Document> {
        self.ready().await?;

        if let Some(id) = document.id() {
            if let Some(existing) = self.read_stored(id).await? {
                return codec::to_public(existing, self.config.revisions);
            }
        }

        let document = with_identifier(document);
        let stored = codec::to_new(&document)?;

        match self.transport.put_document(&self.name, stored.clone()).await {
            Ok(receipt) => {
                let mut stored = stored;
                stored.insert(REV_KEY, receipt.rev);
                codec::to_public(stored, self.config.revisions)
            }
            Err(WebDbError::Conflict(id, collection)) => {
                tracing::debug!(collection = %self.name, %id, "lost create race; returning stored document");
                match self.read_stored(&id).await? {
                    Some(existing) => codec::to_public(existing, self.config.revisions),
                    None => Err(WebDbError::Conflict(id, collection)),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Merges `patch` into the first document matching `query`.
    ///
    /// Returns the merged document with its new revision, or `None` if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Conflict`] if the document changed between read and write.
    pub async fn merge_where(
        &self,
        query: impl Into<Query>,
        patch: Patch,
    ) -> WebDbResult<Option<Document>> {
        let Some(mut stored) = self.first_stored(&query.into()).await? else {
            return Ok(None);
        };

        codec::apply_patch(&mut stored, &patch);
        let receipt = self.transport.put_document(&self.name, stored.clone()).await?;
        stored.insert(REV_KEY, receipt.rev);

        Ok(Some(codec::to_public(stored, self.config.revisions)?))
    }

    /// Deletes the first document matching `query`, returning it as it was.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and the per-document failure of the delete.
    pub async fn delete_where(&self, query: impl Into<Query>) -> WebDbResult<Option<Document>> {
        let Some(stored) = self.first_stored(&query.into()).await? else {
            return Ok(None);
        };

        let operation = delete_op(&stored)?;
        let outcomes = self.transport.bulk_write(&self.name, vec![operation]).await?;
        if let Some(outcome) = outcomes.into_iter().next() {
            outcome.result?;
        }

        Ok(Some(codec::to_public(stored, self.config.revisions)?))
    }

    /// Deletes every document matching `query` in one bulk write.
    ///
    /// Nothing matching is not an error: the count is zero.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn remove(&self, query: impl Into<Query>) -> WebDbResult<Affected> {
        let matches = self
            .scan(&query.into(), Some(vec![ID_KEY.to_string(), REV_KEY.to_string()]))
            .await?;
        if matches.is_empty() {
            return Ok(Affected::default());
        }

        let operations = matches
            .iter()
            .map(delete_op)
            .collect::<WebDbResult<Vec<_>>>()?;

        let outcomes = self.transport.bulk_write(&self.name, operations).await?;
        Ok(Affected::from_outcomes(&self.name, "remove", outcomes))
    }

    /// Alias of [`Collection::remove`].
    pub async fn delete(&self, query: impl Into<Query>) -> WebDbResult<Affected> {
        self.remove(query).await
    }

    /// Streams every match to `handler`, one page at a time.
    ///
    /// Pages hold `size` documents (the last may be shorter) in sort order. The handler
    /// is awaited before the next page is fetched, and its first error stops the run.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] (converted into `E`) for a zero page size,
    /// transport failures, or the handler's error.
    pub async fn batch<F, Fut, E>(
        &self,
        query: impl Into<Query>,
        options: BatchOptions,
        mut handler: F,
    ) -> Result<BatchSummary, E>
    where
        F: FnMut(Vec<Document>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<WebDbError>,
    {
        let size = options.size.unwrap_or(self.config.batch_size);
        if size == 0 {
            return Err(WebDbError::InvalidQuery("batch size must be positive".to_string()).into());
        }

        let fields = options
            .fields
            .as_ref()
            .and_then(|spec| normalize_fields(spec, self.config.revisions));
        let mut cursor = self
            .open_cursor(&query.into(), size, options.limit, 0, options.sort.as_ref(), fields)
            .await?;

        let mut summary = BatchSummary::default();
        while let Some(page) = cursor.next_page().await? {
            summary.pages += 1;
            summary.documents += page.len();
            handler(page).await?;
        }

        tracing::debug!(
            collection = %self.name,
            pages = summary.pages,
            documents = summary.documents,
            "batch complete"
        );
        Ok(summary)
    }

    /// Defines a secondary index.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::InvalidQuery`] for an invalid definition. Defining an
    /// existing index is not an error: the outcome is [`IndexOutcome::Exists`].
    pub async fn index(&self, spec: IndexSpec) -> WebDbResult<IndexOutcome> {
        spec.validate()?;
        self.ready().await?;
        self.transport.create_index(&self.name, spec).await
    }

    /// Deletes the backing collection. The next operation recreates it, empty.
    ///
    /// # Errors
    ///
    /// Propagates transport failures other than the collection being absent.
    pub async fn drop(&self) -> WebDbResult<()> {
        self.lifecycle.drop_collection(&*self.transport).await
    }

    /// Storage statistics for this collection.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn info(&self) -> WebDbResult<CollectionInfo> {
        self.ready().await?;
        self.transport.collection_info(&self.name).await
    }

    /// Every live document in identifier order, without filtering or paging.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn dump(&self) -> WebDbResult<Vec<Document>> {
        self.ready().await?;
        self.transport
            .list_all(&self.name)
            .await?
            .into_iter()
            .map(|stored| codec::to_public(stored, self.config.revisions))
            .collect()
    }

    async fn open_cursor(
        &self,
        query: &Query,
        page_size: usize,
        limit: Option<usize>,
        skip: usize,
        sort: Option<&SortSpec>,
        fields: Option<Vec<String>>,
    ) -> WebDbResult<Cursor<T>> {
        let plan = plan_query(query, &self.transport.capabilities())?;
        let sort = match sort {
            Some(spec) => normalize_sort(spec)?,
            None => Vec::new(),
        };

        self.ready().await?;

        if plan.is_local() {
            tracing::debug!(collection = %self.name, "evaluating query locally");
        }

        Ok(Cursor::new(
            Arc::clone(&self.transport),
            self.name.clone(),
            plan,
            CursorSettings {
                page_size,
                limit,
                skip,
                sort,
                fields,
                scan_page_size: self.config.scan_page_size,
                revisions: self.config.revisions,
            },
        ))
    }

    async fn scan(
        &self,
        query: &Query,
        fields: Option<Vec<String>>,
    ) -> WebDbResult<Vec<bson::Document>> {
        let mut cursor = self
            .open_cursor(query, self.config.scan_page_size, None, 0, None, fields)
            .await?;

        let mut all = Vec::new();
        while let Some(page) = cursor.next_raw_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    async fn first_stored(&self, query: &Query) -> WebDbResult<Option<bson::Document>> {
        if let Some(id) = query.identifier_lookup() {
            self.ready().await?;
            return self.read_stored(id).await;
        }

        let mut cursor = self
            .open_cursor(query, 1, Some(1), 0, None, None)
            .await?;
        Ok(cursor
            .next_raw_page()
            .await?
            .and_then(|page| page.into_iter().next()))
    }

    async fn read_stored(&self, id: &str) -> WebDbResult<Option<bson::Document>> {
        match self.transport.get_document(&self.name, id).await {
            Ok(stored) => Ok(Some(stored)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn with_identifier(mut document: Document) -> Document {
    if document.id().is_none() {
        document.set_id(uuid::Uuid::new_v4().simple().to_string());
    }
    document
}

fn delete_op(stored: &bson::Document) -> WebDbResult<WriteOp> {
    let id = stored
        .get_str(ID_KEY)
        .map_err(|_| WebDbError::InvalidDocument("stored document has no _id".to_string()))?;
    let rev = stored
        .get_str(REV_KEY)
        .map_err(|_| WebDbError::InvalidDocument(format!("document {id} has no _rev")))?;

    Ok(WriteOp::Delete { id: id.to_string(), rev: rev.to_string() })
}
