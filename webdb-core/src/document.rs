//! Public document representation and field patches.
//!
//! A [`Document`] is a field map plus two attributes kept outside of it: the identifier
//! and the revision token. Storage metadata never shows up while iterating fields.

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    codec::{PUBLIC_ID, PUBLIC_REV},
    error::{WebDbError, WebDbResult},
};

/// A document as seen by callers.
///
/// # Example
///
/// ```ignore
/// use webdb_core::document::Document;
///
/// let doc = Document::with_id("alice")
///     .field("name", "Alice")
///     .field("age", 30);
///
/// assert_eq!(doc.id(), Some("alice"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    id: Option<String>,
    rev: Option<String>,
    fields: bson::Document,
}

impl Document {
    /// Creates an empty document without an identifier. One is generated on insert.
    pub fn new() -> Self {
        Document::default()
    }

    /// Creates an empty document with a caller-assigned identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Document {
            id: Some(id.into()),
            ..Document::default()
        }
    }

    pub(crate) fn from_parts(id: Option<String>, rev: Option<String>, fields: bson::Document) -> Self {
        Document { id, rev, fields }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The revision token of the stored version this document was read from.
    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn set_rev(&mut self, rev: impl Into<String>) {
        self.rev = Some(rev.into());
    }

    pub fn fields(&self) -> &bson::Document {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut bson::Document {
        &mut self.fields
    }

    pub fn into_fields(self) -> bson::Document {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Sets a field, returning the previous value.
    ///
    /// `id` and `rev` are attributes, not fields: a string value for either key sets
    /// the attribute instead. Any other value is kept as a field and rejected with
    /// [`WebDbError::InvalidDocument`] when the document is written.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let key = key.into();
        match (key.as_str(), value.into()) {
            (PUBLIC_ID, Bson::String(id)) => self.id.replace(id).map(Bson::String),
            (PUBLIC_REV, Bson::String(rev)) => self.rev.replace(rev).map(Bson::String),
            (_, value) => self.fields.insert(key, value),
        }
    }

    /// Builder form of [`Document::insert`].
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.fields.remove(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a document from any serializable record.
    ///
    /// The record must serialize to a map. A string `id` (and `rev`) member becomes the
    /// document's identifier (and revision).
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Serialization`] if serialization fails and
    /// [`WebDbError::InvalidDocument`] if the record is not a map.
    pub fn from_record<T: Serialize>(record: &T) -> WebDbResult<Self> {
        match serialize_to_bson(record)? {
            Bson::Document(fields) => Ok(Document::from(fields)),
            other => Err(WebDbError::InvalidDocument(format!(
                "expected a map, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// Deserializes this document (fields plus `id`/`rev`) into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Serialization`] if the fields do not fit `T`.
    pub fn to_record<T: DeserializeOwned>(&self) -> WebDbResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.to_bson_document()))?)
    }

    /// Converts this document to JSON, with `id`/`rev` as ordinary members.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Serialization`] if a value has no JSON representation.
    pub fn to_json(&self) -> WebDbResult<Value> {
        Ok(serde_json::to_value(self.to_bson_document())?)
    }

    /// Parses a JSON object into a document.
    ///
    /// # Errors
    ///
    /// Returns [`WebDbError::Serialization`] if `value` is not an object.
    pub fn from_json(value: Value) -> WebDbResult<Self> {
        let fields: bson::Document = serde_json::from_value(value)?;
        Ok(Document::from(fields))
    }

    /// Flattens the document into a single map, attributes first.
    pub fn to_bson_document(&self) -> bson::Document {
        let mut out = bson::Document::new();
        if let Some(id) = &self.id {
            out.insert(PUBLIC_ID, id.clone());
        }
        if let Some(rev) = &self.rev {
            out.insert(PUBLIC_REV, rev.clone());
        }
        for (key, value) in &self.fields {
            out.insert(key.clone(), value.clone());
        }
        out
    }
}

impl From<bson::Document> for Document {
    fn from(fields: bson::Document) -> Self {
        let mut document = Document::new();
        for (key, value) in fields {
            document.insert(key, value);
        }
        document
    }
}

/// One step of a [`Patch`].
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Overwrite (or add) the field. Null is stored as null.
    Set(Bson),
    /// Delete the field.
    Remove,
}

/// An ordered set of field edits merged into stored documents.
///
/// Removing a field and setting it to null are different edits:
///
/// ```ignore
/// use webdb_core::document::Patch;
///
/// let patch = Patch::new()
///     .set("status", "closed")
///     .set("assignee", bson::Bson::Null)
///     .remove("draft");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, PatchOp)>,
}

impl Patch {
    pub fn new() -> Self {
        Patch::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push((field.into(), PatchOp::Set(value.into())));
        self
    }

    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.ops.push((field.into(), PatchOp::Remove));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PatchOp)> {
        self.ops.iter().map(|(field, op)| (field.as_str(), op))
    }
}

/// Every member becomes a [`PatchOp::Set`], null included.
impl From<bson::Document> for Patch {
    fn from(document: bson::Document) -> Self {
        Patch {
            ops: document
                .into_iter()
                .map(|(field, value)| (field, PatchOp::Set(value)))
                .collect(),
        }
    }
}
