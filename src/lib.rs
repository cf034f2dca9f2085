//! # vicinity-store
//!
//! Form-driven MongoDB data-access layer with guarded CRUD and proximity
//! search.
//!
//! This crate provides:
//! - A connection pool with named sources and cached database handles
//! - A generic document adapter translating loosely-typed input forms
//!   into guarded insert/update/upsert/get/delete commands
//! - Entity schemas as a capability trait with sensible defaults
//! - Order building from caller-facing sort specifications
//! - Proximity search with per-entity deduplication and logged writes
//!
//! ## Example
//!
//! ```rust,ignore
//! use vicinity_store::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConnectionPool::single(
//!         StoreConfig::builder()
//!             .uri("mongodb://localhost:27017")
//!             .database("vicinity")
//!             .build()?,
//!     );
//!
//!     let adapter = DocumentAdapter::new(pool, CheckinSchema);
//!
//!     // Forms are plain documents; null fields are stripped, hooks run,
//!     // and the assigned identifier comes back attached.
//!     let checkin = adapter
//!         .insert_one(doc! { "userId": "u-100", "activity": "hiking" })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Guard Clauses
//!
//! Every mutating operation refuses an empty predicate or an empty
//! request document before any I/O reaches the store; on a document
//! store an empty filter matches the whole collection. Whole-collection
//! writes are spelled out as `update_all`/`delete_all` instead.

pub mod adapter;
pub mod config;
pub mod document;
pub mod error;
pub mod order;
pub mod pool;
pub mod proximity;
pub mod schema;

pub use adapter::{DocumentAdapter, UpsertOutcome};
pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use config::{ServerOptions, StoreConfig, StoreConfigBuilder};
pub use error::{GuardReason, StoreError, StoreResult};
pub use order::{CursorOptions, OrderSpec};
pub use pool::ConnectionPool;
pub use proximity::{ActivityFilter, GeoPoint, GeoQuery, ProximityAdapter, ProximitySettings};
pub use schema::{EntitySchema, UpsertDocument};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::adapter::{DocumentAdapter, UpsertOutcome};
    pub use crate::config::{ServerOptions, StoreConfig, StoreConfigBuilder};
    pub use crate::document::{document_from_json, from_document, to_document};
    pub use crate::error::{GuardReason, StoreError, StoreResult};
    pub use crate::order::{
        CursorOptions, OrderSpec, build_find_options, build_order, build_sort_options,
    };
    pub use crate::pool::ConnectionPool;
    pub use crate::proximity::{
        ActivityFilter, GeoPoint, GeoQuery, ProximityAdapter, ProximitySettings,
    };
    pub use crate::schema::{EntitySchema, UpsertDocument};
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
