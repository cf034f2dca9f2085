//! # Document Helpers
//!
//! Conversions between loosely-typed input forms and the BSON documents
//! the store actually receives:
//!
//! - Null-stripping projection of a form into a request document
//! - Identifier resolution into an equality predicate on `_id`
//! - Serde bridges between typed values and [`Document`]

use bson::{Bson, Document, doc, oid::ObjectId};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{StoreError, StoreResult};

/// Keys checked, in order, when resolving an identifier from a form.
const IDENTITY_KEYS: [&str; 2] = ["_id", "id"];

/// Copy every field of `form` whose value is not null.
///
/// This is the default projection for request documents and fallback
/// query predicates: forms arriving from the outside carry `null` for
/// every field the caller left blank, and writing those through would
/// erase stored values.
pub fn non_null_fields(form: &Document) -> Document {
    let mut projected = Document::new();
    for (key, value) in form {
        if !matches!(value, Bson::Null) {
            projected.insert(key.clone(), value.clone());
        }
    }
    projected
}

/// Resolve an identifier field from a form into an `_id` equality predicate.
///
/// Checks `_id` then `id`. An [`ObjectId`] value is used as-is and a string
/// value must parse as a 24-character hex object id. Null identifiers are
/// skipped so partially-filled forms fall through to predicate projection.
///
/// # Errors
///
/// [`StoreError::Unexpected`] when the identifier is a string that does not
/// parse, or a value of any other non-null type.
pub fn identity_query(form: &Document) -> StoreResult<Option<Document>> {
    for key in IDENTITY_KEYS {
        match form.get(key) {
            Some(Bson::ObjectId(id)) => return Ok(Some(doc! { "_id": *id })),
            Some(Bson::String(raw)) => {
                let id = ObjectId::parse_str(raw)?;
                return Ok(Some(doc! { "_id": id }));
            }
            Some(Bson::Null) | None => {}
            Some(other) => {
                return Err(StoreError::unexpected(format!(
                    "identifier field '{}' has unsupported type {:?}",
                    key,
                    other.element_type()
                )));
            }
        }
    }
    Ok(None)
}

/// Convert a serializable value into a BSON document.
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    Ok(bson::to_document(value)?)
}

/// Convert a BSON document into a deserializable value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> StoreResult<T> {
    Ok(bson::from_document(document)?)
}

/// Convert a JSON value into a BSON document.
///
/// Convenience for callers whose forms arrive as `serde_json::Value`
/// request bodies. Non-object values fail with [`StoreError::Unexpected`].
pub fn document_from_json(value: &serde_json::Value) -> StoreResult<Document> {
    to_document(value)
}
