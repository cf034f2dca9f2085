//! # Entity Schemas
//!
//! The capability contract an adapter needs from an entity type. A schema
//! names its collection and opts into behavior by overriding defaults:
//!
//! - `default_order` for reads that specify no ordering
//! - `before_save` to normalize an entity ahead of a write
//! - Projections that turn a materialized entity into request documents
//!
//! ## Example
//!
//! ```rust,ignore
//! struct CheckinSchema;
//!
//! impl EntitySchema for CheckinSchema {
//!     fn collection_name(&self) -> &str {
//!         "checkins"
//!     }
//!
//!     fn default_order(&self) -> Option<OrderSpec> {
//!         Some(OrderSpec::from("-createdAt"))
//!     }
//! }
//! ```

use bson::Document;

use crate::document::non_null_fields;
use crate::order::OrderSpec;

/// Capability contract between an adapter and an entity type.
///
/// Only [`collection_name`](Self::collection_name) is required. The
/// remaining methods default to the least surprising behavior: no default
/// order, a no-op save hook, null-stripping projections, and no upsert or
/// query support.
pub trait EntitySchema: Send + Sync + 'static {
    /// Name of the collection this schema writes to.
    fn collection_name(&self) -> &str;

    /// Ordering applied to reads when the caller specifies none.
    fn default_order(&self) -> Option<OrderSpec> {
        None
    }

    /// Normalize a materialized entity before it is written.
    ///
    /// `is_insert` is `true` for inserts and upserts, `false` for updates.
    fn before_save(&self, _entity: &mut Document, _is_insert: bool) {}

    /// Project a materialized entity into an insert document.
    fn to_insert_document(&self, entity: &Document) -> Document {
        non_null_fields(entity)
    }

    /// Project a materialized entity into an update document.
    fn to_form_document(&self, entity: &Document) -> Document {
        non_null_fields(entity)
    }

    /// Derive a query predicate from a form that carries no identifier.
    ///
    /// Returning `None` falls back to the null-stripping projection of
    /// the form.
    fn to_query_document(&self, _form: &Document) -> Option<Document> {
        None
    }

    /// Split a materialized entity into its upsert halves.
    ///
    /// Returning `None` marks the schema as not upsertable; upsert calls
    /// against it fail instead of guessing a match predicate.
    fn to_upsert_document(&self, _entity: &Document) -> Option<UpsertDocument> {
        None
    }
}

/// The two halves of an upsert.
///
/// `on_insert` identifies the logical record and is written only when the
/// upsert inserts; `update` is written on every call. The two halves must
/// not share field paths, the server rejects conflicting update operators.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertDocument {
    /// Identity fields; the match predicate and the `$setOnInsert` half.
    pub on_insert: Document,
    /// Mutable fields; the `$set` half.
    pub update: Document,
}

impl UpsertDocument {
    /// Create an upsert document from its halves.
    pub fn new(on_insert: Document, update: Document) -> Self {
        Self { on_insert, update }
    }

    /// The predicate the upsert matches on.
    pub fn match_query(&self) -> Document {
        self.on_insert.clone()
    }

    /// The update operator document sent to the store.
    ///
    /// `$set` is omitted when the update half is empty; the server treats
    /// an empty `$set` as an error.
    pub fn update_document(&self) -> Document {
        let mut update = Document::new();
        if !self.update.is_empty() {
            update.insert("$set", self.update.clone());
        }
        update.insert("$setOnInsert", self.on_insert.clone());
        update
    }
}
