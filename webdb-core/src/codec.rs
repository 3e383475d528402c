//! Translation between the stored and the public document shape.
//!
//! Stored documents keep their identifier in `_id`, their revision in `_rev` and may
//! carry other `_`-prefixed bookkeeping keys. Public documents expose the identifier
//! and revision as attributes and never show bookkeeping keys.

use bson::Bson;

use crate::{
    config::RevisionMode,
    document::{Document, Patch, PatchOp},
    error::{WebDbError, WebDbResult},
};

pub const ID_KEY: &str = "_id";
pub const REV_KEY: &str = "_rev";
pub const DELETED_KEY: &str = "_deleted";

pub const PUBLIC_ID: &str = "id";
pub const PUBLIC_REV: &str = "rev";

/// Maps a public field name to its stored name (`id` → `_id`).
pub fn internal_field_name(field: &str) -> &str {
    match field {
        PUBLIC_ID => ID_KEY,
        other => other,
    }
}

/// Converts a stored document into its public form.
///
/// # Errors
///
/// Returns [`WebDbError::InvalidDocument`] if `_id` (or `_rev`) is present but not a string.
pub fn to_public(stored: bson::Document, revisions: RevisionMode) -> WebDbResult<Document> {
    let mut id = None;
    let mut rev = None;
    let mut fields = bson::Document::new();

    for (key, value) in stored {
        match key.as_str() {
            ID_KEY => id = Some(expect_string(ID_KEY, value)?),
            REV_KEY => {
                let token = expect_string(REV_KEY, value)?;
                if revisions.exposes() {
                    rev = Some(token);
                }
            }
            k if k.starts_with('_') => {}
            _ => {
                fields.insert(key, value);
            }
        }
    }

    Ok(Document::from_parts(id, rev, fields))
}

fn expect_string(key: &str, value: Bson) -> WebDbResult<String> {
    match value {
        Bson::String(s) => Ok(s),
        other => Err(WebDbError::InvalidDocument(format!(
            "{key} must be a string, got {:?}",
            other.element_type()
        ))),
    }
}

/// Converts a public document into its stored form.
///
/// Top-level nulls are dropped; timestamps anywhere in the tree become epoch millis.
///
/// # Errors
///
/// Returns [`WebDbError::InvalidDocument`] if the document has no identifier, carries
/// a non-string `id` or `rev` field, or a field whose name starts with `_`.
pub fn to_internal(document: &Document) -> WebDbResult<bson::Document> {
    let id = document
        .id()
        .ok_or_else(|| WebDbError::InvalidDocument("document has no identifier".to_string()))?;

    let mut stored = bson::Document::new();
    stored.insert(ID_KEY, id);
    if let Some(rev) = document.rev() {
        stored.insert(REV_KEY, rev);
    }

    for (key, value) in document.fields() {
        check_field_name(key)?;
        if matches!(value, Bson::Null) {
            continue;
        }
        stored.insert(key.clone(), storage_value(value.clone()));
    }

    Ok(stored)
}

/// Stored form of a document about to be created.
///
/// Any revision the document was read with is dropped, so documents listed from one
/// collection can be written into another.
///
/// # Errors
///
/// Same as [`to_internal`].
pub fn to_new(document: &Document) -> WebDbResult<bson::Document> {
    let mut stored = to_internal(document)?;
    stored.remove(REV_KEY);
    Ok(stored)
}

fn check_field_name(key: &str) -> WebDbResult<()> {
    if key == PUBLIC_ID || key == PUBLIC_REV {
        return Err(WebDbError::InvalidDocument(format!("{key} must be a string")));
    }
    if key.starts_with('_') {
        return Err(WebDbError::InvalidDocument(format!(
            "field {key} uses the reserved `_` prefix"
        )));
    }
    Ok(())
}

/// Rewrites timestamps (recursively) into epoch milliseconds.
pub fn storage_value(value: Bson) -> Bson {
    match value {
        Bson::DateTime(at) => Bson::Int64(at.timestamp_millis()),
        Bson::Document(inner) => Bson::Document(
            inner
                .into_iter()
                .map(|(key, value)| (key, storage_value(value)))
                .collect(),
        ),
        Bson::Array(items) => Bson::Array(items.into_iter().map(storage_value).collect()),
        other => other,
    }
}

/// Merges a patch into a stored document in place.
///
/// Identifier and revision keys are never touched by a patch, nor is any other
/// `_`-prefixed bookkeeping key.
pub fn apply_patch(stored: &mut bson::Document, patch: &Patch) {
    for (field, op) in patch.iter() {
        let field = internal_field_name(field);
        if field == PUBLIC_REV || field.starts_with('_') {
            continue;
        }

        match op {
            PatchOp::Set(value) => {
                stored.insert(field, storage_value(value.clone()));
            }
            PatchOp::Remove => {
                stored.remove(field);
            }
        }
    }
}

/// Keeps only `_id`, `_rev` and the listed fields, in stored order.
///
/// Used when the transport did not apply a projection itself.
pub fn project(stored: bson::Document, fields: &[String]) -> bson::Document {
    stored
        .into_iter()
        .filter(|(key, _)| {
            key == ID_KEY || key == REV_KEY || fields.iter().any(|field| field == key)
        })
        .collect()
}
