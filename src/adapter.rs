//! # Document Adapter
//!
//! Generic CRUD engine bound to an [`EntitySchema`]. Every operation
//! follows the same pipeline:
//!
//! - Materialize an entity from the raw input form and run the save hook
//! - Project the entity into a request document
//! - Resolve the query predicate (identifier, schema projection, fallback)
//! - Guard against empty predicates and empty request documents
//! - Issue exactly one store command and normalize its result
//!
//! The guards are the safety property of this layer: on a document store
//! an empty filter matches the whole collection, so an accidental
//! `update_one(doc! {})` must fail before any I/O. Full-collection writes
//! go through the explicit `*_all` operations instead.
//!
//! ## Example
//!
//! ```rust,ignore
//! let adapter = DocumentAdapter::new(pool, CheckinSchema);
//!
//! let checkin = adapter.insert_one(form).await?;
//! let found = adapter.get_one(doc! { "_id": checkin.get_object_id("_id")? }).await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::options::{CountOptions, UpdateOptions};
use mongodb::{Collection, Database};
use tracing::{debug, error};

use crate::document::{identity_query, non_null_fields};
use crate::error::{GuardReason, StoreError, StoreResult};
use crate::order::{CursorOptions, build_find_options};
use crate::pool::ConnectionPool;
use crate::schema::{EntitySchema, UpsertDocument};

/// Normalized result of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// Documents modified when the call matched an existing document.
    pub modified_count: u64,
    /// Identifier assigned when the call inserted a new document.
    pub upserted_id: Option<Bson>,
}

impl UpsertOutcome {
    /// Whether the call inserted rather than updated.
    pub fn inserted(&self) -> bool {
        self.upserted_id.is_some()
    }
}

/// CRUD adapter for one entity schema on one connection source.
pub struct DocumentAdapter<S> {
    pool: ConnectionPool,
    source: String,
    schema: Arc<S>,
    debug: bool,
}

impl<S> Clone for DocumentAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            source: self.source.clone(),
            schema: Arc::clone(&self.schema),
            debug: self.debug,
        }
    }
}

impl<S: EntitySchema> DocumentAdapter<S> {
    /// Create an adapter on the pool's default source.
    pub fn new(pool: ConnectionPool, schema: S) -> Self {
        Self::with_source(pool, ConnectionPool::DEFAULT_SOURCE, schema)
    }

    /// Create an adapter on a named source.
    ///
    /// Debug execution mode is sampled from the source's configuration
    /// here, not per call.
    pub fn with_source(pool: ConnectionPool, source: impl Into<String>, schema: S) -> Self {
        let source = source.into();
        let debug = pool.debug_mode(&source);
        Self {
            pool,
            source,
            schema: Arc::new(schema),
            debug,
        }
    }

    /// The bound schema.
    pub fn schema(&self) -> &S {
        &self.schema
    }

    /// The pool this adapter connects through.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The connection source this adapter targets.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Handle to the schema's collection.
    pub async fn collection(&self) -> StoreResult<Collection<Document>> {
        Ok(self.database().await?.collection(self.schema.collection_name()))
    }

    async fn database(&self) -> StoreResult<Database> {
        self.pool.connect(&self.source).await
    }

    // ---------- inserts ----------

    /// Insert an entity materialized from a form.
    ///
    /// Returns the inserted document with its assigned `_id` attached.
    pub async fn insert_one(&self, form: Document) -> StoreResult<Document> {
        let entity = self.materialize(&form, true);
        let document = self.schema.to_insert_document(&entity);
        self.issue_insert("insert_one", document).await
    }

    /// Insert a raw document, skipping projection and save hooks.
    pub async fn insert_one_simple(&self, document: Document) -> StoreResult<Document> {
        self.issue_insert("insert_one_simple", document).await
    }

    async fn issue_insert(
        &self,
        operation: &'static str,
        mut document: Document,
    ) -> StoreResult<Document> {
        self.guard_document(operation, &document)?;

        let collection = self.collection().await?;
        debug!(operation, collection = %self.schema.collection_name(), "issuing insert");
        let result = collection
            .insert_one(&document, None)
            .await
            .map_err(|e| self.driver_failure(operation, &document, e))?;

        document.insert("_id", result.inserted_id);
        Ok(document)
    }

    // ---------- updates ----------

    /// Update the document matching a form's resolved predicate.
    ///
    /// Returns the modified count.
    pub async fn update_one(&self, form: Document) -> StoreResult<u64> {
        let entity = self.materialize(&form, false);
        let document = self.schema.to_form_document(&entity);
        let query = self.resolve_query("update_one", &form)?;
        self.guard_query("update_one", &query)?;
        self.issue_update("update_one", query, document, false).await
    }

    /// Update one document with a raw predicate and raw `$set` fields.
    pub async fn update_one_simple(&self, query: Document, document: Document) -> StoreResult<u64> {
        self.guard_query("update_one_simple", &query)?;
        self.issue_update("update_one_simple", query, document, false)
            .await
    }

    /// Update every document matching a form's resolved predicate.
    pub async fn update_many(&self, form: Document) -> StoreResult<u64> {
        let entity = self.materialize(&form, false);
        let document = self.schema.to_form_document(&entity);
        let query = self.resolve_query("update_many", &form)?;
        self.guard_query("update_many", &query)?;
        self.issue_update("update_many", query, document, true).await
    }

    /// Update every document matching a raw predicate.
    pub async fn update_many_simple(
        &self,
        query: Document,
        document: Document,
    ) -> StoreResult<u64> {
        self.guard_query("update_many_simple", &query)?;
        self.issue_update("update_many_simple", query, document, true)
            .await
    }

    /// Update the whole collection.
    ///
    /// The deliberate escape hatch from the empty-predicate guard.
    pub async fn update_all(&self, form: Document) -> StoreResult<u64> {
        let entity = self.materialize(&form, false);
        let document = self.schema.to_form_document(&entity);
        self.issue_update("update_all", Document::new(), document, true)
            .await
    }

    /// Update the whole collection with raw `$set` fields.
    pub async fn update_all_simple(&self, document: Document) -> StoreResult<u64> {
        self.issue_update("update_all_simple", Document::new(), document, true)
            .await
    }

    async fn issue_update(
        &self,
        operation: &'static str,
        query: Document,
        document: Document,
        many: bool,
    ) -> StoreResult<u64> {
        self.guard_document(operation, &document)?;

        let update = doc! { "$set": document };
        let collection = self.collection().await?;
        debug!(operation, collection = %self.schema.collection_name(), query = %query, "issuing update");
        let result = if many {
            collection.update_many(query.clone(), update, None).await
        } else {
            collection.update_one(query.clone(), update, None).await
        }
        .map_err(|e| self.driver_failure(operation, &query, e))?;

        Ok(result.modified_count)
    }

    // ---------- upsert ----------

    /// Insert-or-update keyed by the schema's upsert projection.
    ///
    /// The match predicate is the upsert document's own on-insert half,
    /// so the condition deciding insert-vs-update can never drift from
    /// the payload being written.
    pub async fn upsert_one(&self, form: Document) -> StoreResult<UpsertOutcome> {
        let entity = self.materialize(&form, true);
        let upsert = self.upsert_halves("upsert_one", &entity)?;
        let query = upsert.match_query();
        self.guard_query("upsert_one", &query)?;

        let options = UpdateOptions::builder().upsert(true).build();
        let collection = self.collection().await?;
        debug!(operation = "upsert_one", collection = %self.schema.collection_name(), query = %query, "issuing upsert");
        let result = collection
            .update_one(query.clone(), upsert.update_document(), options)
            .await
            .map_err(|e| self.driver_failure("upsert_one", &query, e))?;

        Ok(UpsertOutcome {
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    // ---------- reads ----------

    /// Fetch the document matching a form's resolved predicate.
    pub async fn get_one(&self, form: Document) -> StoreResult<Option<Document>> {
        let query = self.resolve_query("get_one", &form)?;
        self.guard_query("get_one", &query)?;
        self.issue_find_one("get_one", query).await
    }

    /// Fetch one document with a raw predicate.
    pub async fn get_one_simple(&self, query: Document) -> StoreResult<Option<Document>> {
        self.guard_query("get_one_simple", &query)?;
        self.issue_find_one("get_one_simple", query).await
    }

    async fn issue_find_one(
        &self,
        operation: &'static str,
        query: Document,
    ) -> StoreResult<Option<Document>> {
        let collection = self.collection().await?;
        debug!(operation, collection = %self.schema.collection_name(), query = %query, "issuing find one");
        collection
            .find_one(query.clone(), None)
            .await
            .map_err(|e| self.driver_failure(operation, &query, e))
    }

    /// Fetch every document matching a form's resolved predicate.
    ///
    /// An empty predicate is allowed here; listing a collection is a read,
    /// not a blast-radius hazard. Sort, skip and limit come from
    /// `options`, with the ordering spec resolved against the schema's
    /// default order.
    pub async fn get_many(
        &self,
        form: Document,
        options: CursorOptions,
    ) -> StoreResult<Vec<Document>> {
        let query = self.resolve_query("get_many", &form)?;
        let options = build_find_options(self.schema.as_ref(), options);

        let collection = self.collection().await?;
        debug!(operation = "get_many", collection = %self.schema.collection_name(), query = %query, "issuing find");
        let cursor = collection
            .find(query.clone(), options.into_find_options())
            .await
            .map_err(|e| self.driver_failure("get_many", &query, e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| self.driver_failure("get_many", &query, e))
    }

    /// Whether any document matches a form's resolved predicate.
    ///
    /// Bounded count, never a scan.
    pub async fn exists(&self, form: Document) -> StoreResult<bool> {
        let query = self.resolve_query("exists", &form)?;
        self.guard_query("exists", &query)?;

        let options = bounded_count_options();
        let collection = self.collection().await?;
        debug!(operation = "exists", collection = %self.schema.collection_name(), query = %query, "issuing bounded count");
        let count = collection
            .count_documents(query.clone(), options)
            .await
            .map_err(|e| self.driver_failure("exists", &query, e))?;

        Ok(count > 0)
    }

    // ---------- find and modify ----------

    /// Atomically update one document and return its new state.
    ///
    /// Returns `None` when nothing matched or the reply envelope was not
    /// ok; callers that need to distinguish the two must check
    /// [`exists`](Self::exists) separately.
    pub async fn get_one_and_update(&self, form: Document) -> StoreResult<Option<Document>> {
        let entity = self.materialize(&form, false);
        let document = self.schema.to_form_document(&entity);
        let query = self.resolve_query("get_one_and_update", &form)?;
        self.guard_query("get_one_and_update", &query)?;
        self.guard_document("get_one_and_update", &document)?;
        self.issue_find_and_modify("get_one_and_update", query, doc! { "$set": document }, false)
            .await
    }

    /// Atomically upsert and return the resulting document state.
    pub async fn get_one_and_upsert(&self, form: Document) -> StoreResult<Option<Document>> {
        let entity = self.materialize(&form, true);
        let upsert = self.upsert_halves("get_one_and_upsert", &entity)?;
        let query = upsert.match_query();
        self.guard_query("get_one_and_upsert", &query)?;
        self.issue_find_and_modify("get_one_and_upsert", query, upsert.update_document(), true)
            .await
    }

    async fn issue_find_and_modify(
        &self,
        operation: &'static str,
        query: Document,
        update: Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        let database = self.database().await?;
        let mut command = doc! {
            "findAndModify": self.schema.collection_name(),
            "query": query.clone(),
            "update": update,
            "new": true,
        };
        if upsert {
            command.insert("upsert", true);
        }

        debug!(operation, collection = %self.schema.collection_name(), query = %query, "issuing findAndModify");
        let reply = database
            .run_command(command, None)
            .await
            .map_err(|e| self.driver_failure(operation, &query, e))?;

        Ok(modify_envelope_value(reply))
    }

    // ---------- deletes ----------

    /// Delete the document matching a form's resolved predicate.
    ///
    /// Returns the deleted count.
    pub async fn delete_one(&self, form: Document) -> StoreResult<u64> {
        let query = self.resolve_query("delete_one", &form)?;
        self.guard_query("delete_one", &query)?;
        self.issue_delete("delete_one", query, false).await
    }

    /// Delete one document with a raw predicate.
    pub async fn delete_one_simple(&self, query: Document) -> StoreResult<u64> {
        self.guard_query("delete_one_simple", &query)?;
        self.issue_delete("delete_one_simple", query, false).await
    }

    /// Delete every document matching a form's resolved predicate.
    pub async fn delete_many(&self, form: Document) -> StoreResult<u64> {
        let query = self.resolve_query("delete_many", &form)?;
        self.guard_query("delete_many", &query)?;
        self.issue_delete("delete_many", query, true).await
    }

    /// Delete every document matching a raw predicate.
    pub async fn delete_many_simple(&self, query: Document) -> StoreResult<u64> {
        self.guard_query("delete_many_simple", &query)?;
        self.issue_delete("delete_many_simple", query, true).await
    }

    /// Delete the whole collection's contents.
    ///
    /// The deliberate escape hatch from the empty-predicate guard.
    pub async fn delete_all(&self) -> StoreResult<u64> {
        self.issue_delete("delete_all", Document::new(), true).await
    }

    async fn issue_delete(
        &self,
        operation: &'static str,
        query: Document,
        many: bool,
    ) -> StoreResult<u64> {
        let collection = self.collection().await?;
        debug!(operation, collection = %self.schema.collection_name(), query = %query, "issuing delete");
        let result = if many {
            collection.delete_many(query.clone(), None).await
        } else {
            collection.delete_one(query.clone(), None).await
        }
        .map_err(|e| self.driver_failure(operation, &query, e))?;

        Ok(result.deleted_count)
    }

    // ---------- shared plumbing ----------

    fn materialize(&self, form: &Document, is_insert: bool) -> Document {
        let mut entity = form.clone();
        self.schema.before_save(&mut entity, is_insert);
        entity
    }

    /// Resolve the predicate for a form: identifier first, then the
    /// schema's query projection, then the null-stripping fallback.
    fn resolve_query(&self, operation: &'static str, form: &Document) -> StoreResult<Document> {
        match identity_query(form) {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => match self.schema.to_query_document(form) {
                Some(query) => Ok(query),
                None => Ok(non_null_fields(form)),
            },
            Err(err) => Err(self.escalate(operation, err)),
        }
    }

    fn upsert_halves(
        &self,
        operation: &'static str,
        entity: &Document,
    ) -> StoreResult<UpsertDocument> {
        match self.schema.to_upsert_document(entity) {
            Some(upsert) => Ok(upsert),
            None => Err(self.escalate(
                operation,
                StoreError::unexpected(format!(
                    "schema for '{}' defines no upsert projection",
                    self.schema.collection_name()
                )),
            )),
        }
    }

    fn guard_query(&self, operation: &'static str, query: &Document) -> StoreResult<()> {
        if query.is_empty() {
            let err = StoreError::guard(
                operation,
                self.schema.collection_name(),
                GuardReason::EmptyQuery,
            );
            return Err(self.escalate(operation, err));
        }
        Ok(())
    }

    fn guard_document(&self, operation: &'static str, document: &Document) -> StoreResult<()> {
        if document.is_empty() {
            let err = StoreError::guard(
                operation,
                self.schema.collection_name(),
                GuardReason::EmptyDocument,
            );
            return Err(self.escalate(operation, err));
        }
        Ok(())
    }

    /// Route a pre-command failure. In debug execution mode the failure
    /// panics so caller bugs surface immediately; otherwise it is logged
    /// and returned for rejection.
    fn escalate(&self, operation: &'static str, err: StoreError) -> StoreError {
        if self.debug {
            panic!("{err}");
        }
        error!(operation, collection = %self.schema.collection_name(), error = %err, "rejected before store command");
        err
    }

    fn driver_failure(
        &self,
        operation: &'static str,
        context: &Document,
        err: mongodb::error::Error,
    ) -> StoreError {
        error!(operation, collection = %self.schema.collection_name(), context = %context, error = %err, "store rejected command");
        StoreError::Driver(err)
    }
}

/// Count options for an existence check, capped at the first match.
fn bounded_count_options() -> CountOptions {
    CountOptions::builder().limit(1).build()
}

/// Unwrap a findAndModify `{ok, value}` reply into its value document.
fn modify_envelope_value(mut reply: Document) -> Option<Document> {
    if !envelope_ok(&reply) {
        return None;
    }
    match reply.remove("value") {
        Some(Bson::Document(value)) => Some(value),
        _ => None,
    }
}

fn envelope_ok(reply: &Document) -> bool {
    match reply.get("ok") {
        Some(Bson::Double(ok)) => *ok == 1.0,
        Some(Bson::Int32(ok)) => *ok == 1,
        Some(Bson::Int64(ok)) => *ok == 1,
        _ => false,
    }
}
