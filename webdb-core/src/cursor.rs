//! Page-wise iteration over query results.
//!
//! A [`Cursor`] pulls pages from the transport with continuation tokens and hands out
//! pages of public documents. When the query is evaluated locally it over-fetches,
//! filters, and re-chunks so callers still see pages of exactly the requested size
//! (except the last one).

use futures::stream::{self, Stream};
use std::{collections::VecDeque, sync::Arc};

use crate::{
    codec,
    config::RevisionMode,
    document::Document,
    error::WebDbResult,
    matcher::Matcher,
    normalize::QueryPlan,
    query::{FieldSpec, Query, Sort, SortSpec},
    transport::{FindRequest, Transport},
};

/// Options for [`Collection::batch`](crate::collection::Collection::batch).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOptions {
    /// Page size; the database's configured batch size when unset.
    pub size: Option<usize>,
    /// Stop after this many documents in total.
    pub limit: Option<usize>,
    pub sort: Option<SortSpec>,
    pub fields: Option<FieldSpec>,
}

impl BatchOptions {
    /// Options with every setting left to the collection's defaults.
    pub fn new() -> Self {
        BatchOptions::default()
    }

    /// Sets the number of documents handed to each handler call. Zero is rejected
    /// when the batch starts.
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Stops after `limit` documents; the last page may be short.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the order pages are delivered in. Ties are broken by identifier.
    pub fn sort(mut self, sort: impl Into<SortSpec>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    /// Restricts delivered documents to these fields plus the identifier.
    pub fn fields(mut self, fields: impl Into<FieldSpec>) -> Self {
        self.fields = Some(fields.into());
        self
    }
}

/// What a completed batch run delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub pages: usize,
    pub documents: usize,
}

pub(crate) struct CursorSettings {
    pub page_size: usize,
    pub limit: Option<usize>,
    pub skip: usize,
    pub sort: Vec<Sort>,
    pub fields: Option<Vec<String>>,
    pub scan_page_size: usize,
    pub revisions: RevisionMode,
}

/// Pull-based iterator over the pages of a query.
pub struct Cursor<T> {
    transport: Arc<T>,
    collection: String,
    request: FindRequest,
    residual: Option<Query>,
    /// Projection applied after local matching.
    local_fields: Option<Vec<String>>,
    matcher: Matcher,
    revisions: RevisionMode,
    page_size: usize,
    scan_page_size: usize,
    limit: Option<usize>,
    skip: usize,
    delivered: usize,
    bookmark: Option<String>,
    buffer: VecDeque<bson::Document>,
    exhausted: bool,
    done: bool,
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection)
            .field("local", &self.residual.is_some())
            .field("page_size", &self.page_size)
            .field("delivered", &self.delivered)
            .field("done", &self.done)
            .finish()
    }
}

impl<T> Cursor<T>
where
    T: Transport,
{
    pub(crate) fn new(
        transport: Arc<T>,
        collection: impl Into<String>,
        plan: QueryPlan,
        settings: CursorSettings,
    ) -> Self {
        let local = plan.residual.is_some();
        let (fields, local_fields) = if local {
            (None, settings.fields)
        } else {
            (settings.fields, None)
        };

        Cursor {
            transport,
            collection: collection.into(),
            request: FindRequest::new(plan.selector).sort(settings.sort).fields(fields),
            residual: plan.residual,
            local_fields,
            matcher: Matcher::new(),
            revisions: settings.revisions,
            page_size: settings.page_size.max(1),
            scan_page_size: settings.scan_page_size.max(1),
            limit: settings.limit,
            skip: settings.skip,
            delivered: 0,
            bookmark: None,
            buffer: VecDeque::new(),
            exhausted: false,
            done: false,
        }
    }

    /// Returns `true` once the cursor has handed out its last page.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of documents handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Returns the next page of stored documents, or `None` when iteration is over.
    ///
    /// # Errors
    ///
    /// Propagates transport failures. The cursor can be polled again afterwards; the
    /// failed fetch is retried with the same continuation token.
    pub async fn next_raw_page(&mut self) -> WebDbResult<Option<Vec<bson::Document>>> {
        if self.done {
            return Ok(None);
        }

        let want = match self.limit {
            Some(limit) => self.page_size.min(limit.saturating_sub(self.delivered)),
            None => self.page_size,
        };
        if want == 0 {
            self.done = true;
            return Ok(None);
        }

        while self.buffer.len() < want && !self.exhausted {
            self.fetch(want).await?;
        }

        let take = want.min(self.buffer.len());
        let page: Vec<_> = self.buffer.drain(..take).collect();
        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.delivered += page.len();
        let limit_reached = self.limit.is_some_and(|limit| self.delivered >= limit);
        if limit_reached || (self.exhausted && self.buffer.is_empty()) {
            self.done = true;
        }

        Ok(Some(page))
    }

    /// Returns the next page of public documents, or `None` when iteration is over.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and malformed stored documents.
    pub async fn next_page(&mut self) -> WebDbResult<Option<Vec<Document>>> {
        let Some(page) = self.next_raw_page().await? else {
            return Ok(None);
        };

        page.into_iter()
            .map(|stored| {
                let stored = match &self.local_fields {
                    Some(fields) => codec::project(stored, fields),
                    None => stored,
                };
                codec::to_public(stored, self.revisions)
            })
            .collect::<WebDbResult<Vec<_>>>()
            .map(Some)
    }

    /// Drains every remaining page into one list.
    ///
    /// # Errors
    ///
    /// Propagates the first failure.
    pub async fn collect_all(mut self) -> WebDbResult<Vec<Document>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    /// Stream view: one item per page.
    pub fn into_stream(self) -> impl Stream<Item = WebDbResult<Vec<Document>>> {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next_page().await?.map(|page| (page, cursor)))
        })
    }

    async fn fetch(&mut self, want: usize) -> WebDbResult<()> {
        let requested = if self.residual.is_some() {
            self.scan_page_size
        } else {
            want - self.buffer.len() + self.skip
        };

        let request = FindRequest {
            limit: requested,
            bookmark: self.bookmark.clone(),
            ..self.request.clone()
        };
        let response = self.transport.find(&self.collection, request).await?;

        let fetched = response.docs.len();
        if fetched < requested || response.bookmark.is_none() {
            self.exhausted = true;
        }
        self.bookmark = response.bookmark;

        tracing::trace!(
            collection = %self.collection,
            fetched,
            exhausted = self.exhausted,
            "fetched page"
        );

        for stored in response.docs {
            if let Some(residual) = &self.residual {
                if !self.matcher.matches(residual, &stored) {
                    continue;
                }
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            self.buffer.push_back(stored);
        }

        Ok(())
    }
}
