//! Error types and result types for collection and transport operations.
//!
//! Every fallible operation in this crate returns [`WebDbResult<T>`]. The error
//! enum is `Clone` because a single collection initialization failure is handed to
//! every caller that was waiting on it.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when talking to a collection
/// or to the underlying storage transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WebDbError {
    /// The requested document does not exist.
    /// The first argument is the document identifier, the second is the collection name.
    #[error("Document {0} not found in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A collection with this name already exists.
    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),
    /// A write carried a stale (or missing) revision token.
    /// The first argument is the document identifier, the second is the collection name.
    #[error("Revision conflict on document {0} in collection {1}")]
    Conflict(String, String),
    /// The storage transport failed (network, storage engine, ...).
    #[error("Transport error: {0}")]
    Transport(String),
    /// A query, sort, projection or index specification is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A stored or supplied document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Conversion between documents and BSON/JSON failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WebDbError {
    /// Returns `true` for errors that mean "the target does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            WebDbError::DocumentNotFound(..) | WebDbError::CollectionNotFound(_)
        )
    }

    /// Returns `true` for stale-revision write failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WebDbError::Conflict(..))
    }
}

/// A specialized `Result` type for webdb operations.
pub type WebDbResult<T> = Result<T, WebDbError>;

impl From<BsonError> for WebDbError {
    fn from(err: BsonError) -> Self {
        WebDbError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for WebDbError {
    fn from(err: SerdeJsonError) -> Self {
        WebDbError::Serialization(err.to_string())
    }
}
