//! One `set` call for create, merge and delete.
//!
//! The collection API keeps the three behaviors apart
//! ([`create_if_absent`](Collection::create_if_absent),
//! [`merge_where`](Collection::merge_where), [`delete_where`](Collection::delete_where)).
//! [`SetExt`] picks one from the shape of its argument:
//!
//! | argument                    | behavior                                   |
//! |-----------------------------|--------------------------------------------|
//! | `Document`                  | create unless its id is already stored     |
//! | `Vec<Document>`             | insert every document                      |
//! | `(query, Patch)`            | merge into the first match                 |
//! | `(query, Some(patch))`      | merge into the first match                 |
//! | `(query, None)`             | delete the first match                     |

use async_trait::async_trait;

use webdb_core::{
    collection::Collection,
    document::{Document, Patch},
    error::WebDbResult,
    query::Query,
    transport::{BulkOutcome, Transport},
};

/// The argument shapes accepted by [`SetExt::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetArgs {
    Create(Document),
    CreateMany(Vec<Document>),
    Merge(Query, Patch),
    Delete(Query),
}

impl From<Document> for SetArgs {
    fn from(document: Document) -> Self {
        SetArgs::Create(document)
    }
}

impl From<Vec<Document>> for SetArgs {
    fn from(documents: Vec<Document>) -> Self {
        SetArgs::CreateMany(documents)
    }
}

impl<Q: Into<Query>> From<(Q, Patch)> for SetArgs {
    fn from((query, patch): (Q, Patch)) -> Self {
        SetArgs::Merge(query.into(), patch)
    }
}

impl<Q: Into<Query>> From<(Q, Option<Patch>)> for SetArgs {
    fn from((query, patch): (Q, Option<Patch>)) -> Self {
        match patch {
            Some(patch) => SetArgs::Merge(query.into(), patch),
            None => SetArgs::Delete(query.into()),
        }
    }
}

/// What a [`SetExt::set`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// The stored document: either the one just created or the one already there.
    Created(Document),
    /// One outcome per inserted document, in input order.
    Inserted(Vec<BulkOutcome>),
    /// The merged document with its new revision.
    Merged(Document),
    /// The document as it was before deletion.
    Deleted(Document),
    /// Nothing matched the query.
    NoMatch,
}

impl SetOutcome {
    /// The single document this outcome carries, if any.
    pub fn document(&self) -> Option<&Document> {
        match self {
            SetOutcome::Created(document)
            | SetOutcome::Merged(document)
            | SetOutcome::Deleted(document) => Some(document),
            SetOutcome::Inserted(_) | SetOutcome::NoMatch => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            SetOutcome::Created(document)
            | SetOutcome::Merged(document)
            | SetOutcome::Deleted(document) => Some(document),
            SetOutcome::Inserted(_) | SetOutcome::NoMatch => None,
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, SetOutcome::NoMatch)
    }
}

/// Create-or-merge-or-delete, chosen by argument shape.
#[async_trait]
pub trait SetExt: Send + Sync {
    /// Dispatches to the operation named by `args`. See the [module docs](self).
    ///
    /// # Errors
    ///
    /// Whatever the selected collection operation returns.
    async fn set<A>(&self, args: A) -> WebDbResult<SetOutcome>
    where
        A: Into<SetArgs> + Send;

    /// Alias of [`SetExt::set`].
    async fn upsert<A>(&self, args: A) -> WebDbResult<SetOutcome>
    where
        A: Into<SetArgs> + Send,
    {
        self.set(args).await
    }
}

#[async_trait]
impl<T> SetExt for Collection<T>
where
    T: Transport + 'static,
{
    async fn set<A>(&self, args: A) -> WebDbResult<SetOutcome>
    where
        A: Into<SetArgs> + Send,
    {
        let outcome = match args.into() {
            SetArgs::Create(document) => SetOutcome::Created(self.create_if_absent(document).await?),
            SetArgs::CreateMany(documents) => SetOutcome::Inserted(self.insert(documents).await?),
            SetArgs::Merge(query, patch) => match self.merge_where(query, patch).await? {
                Some(document) => SetOutcome::Merged(document),
                None => SetOutcome::NoMatch,
            },
            SetArgs::Delete(query) => match self.delete_where(query).await? {
                Some(document) => SetOutcome::Deleted(document),
                None => SetOutcome::NoMatch,
            },
        };

        Ok(outcome)
    }
}
