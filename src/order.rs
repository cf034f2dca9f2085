//! # Order Building
//!
//! Translation of caller-facing ordering specs into driver sort documents.
//!
//! An [`OrderSpec`] names fields in ascending order by default; a leading
//! `-` flips a field to descending. Specs come in three shapes:
//!
//! - A list of field names
//! - A comma-separated string
//! - A ready-made sort document, passed through untouched
//!
//! ## Example
//!
//! ```rust,ignore
//! let sort = build_order(Some(&OrderSpec::from("createdAt,-distance")));
//! // Some({ "createdAt": 1, "distance": -1 })
//! ```

use bson::Document;
use mongodb::options::{FindOneOptions, FindOptions};

use crate::schema::EntitySchema;

/// A caller-facing ordering specification.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderSpec {
    /// Field names, each optionally prefixed with `-` for descending.
    Fields(Vec<String>),
    /// Comma-separated field names.
    List(String),
    /// A sort document used as-is.
    Map(Document),
}

impl From<&str> for OrderSpec {
    fn from(list: &str) -> Self {
        Self::List(list.to_string())
    }
}

impl From<String> for OrderSpec {
    fn from(list: String) -> Self {
        Self::List(list)
    }
}

impl From<Vec<String>> for OrderSpec {
    fn from(fields: Vec<String>) -> Self {
        Self::Fields(fields)
    }
}

impl From<Vec<&str>> for OrderSpec {
    fn from(fields: Vec<&str>) -> Self {
        Self::Fields(fields.into_iter().map(String::from).collect())
    }
}

impl From<Document> for OrderSpec {
    fn from(sort: Document) -> Self {
        Self::Map(sort)
    }
}

/// Cursor shaping options for read operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    /// Ordering spec; takes precedence over `sort` and is consumed when
    /// the sort document is resolved.
    pub order: Option<OrderSpec>,
    /// Explicit sort document.
    pub sort: Option<Document>,
    /// Documents to skip.
    pub skip: Option<u64>,
    /// Maximum documents to return.
    pub limit: Option<i64>,
}

impl CursorOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ordering spec.
    pub fn order(mut self, order: impl Into<OrderSpec>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Set an explicit sort document.
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Convert into driver find options.
    pub fn into_find_options(self) -> FindOptions {
        FindOptions::builder()
            .sort(self.sort)
            .skip(self.skip)
            .limit(self.limit)
            .build()
    }

    /// Convert into driver find-one options. The limit, if any, is
    /// dropped; a single read carries none.
    pub fn into_find_one_options(self) -> FindOneOptions {
        FindOneOptions::builder()
            .sort(self.sort)
            .skip(self.skip)
            .build()
    }
}

/// Build a sort document from an ordering spec.
///
/// Returns `None` for an absent spec or one that names no fields.
pub fn build_order(spec: Option<&OrderSpec>) -> Option<Document> {
    let sort = match spec? {
        OrderSpec::Map(sort) => sort.clone(),
        OrderSpec::List(raw) => order_from_tokens(raw.split(',')),
        OrderSpec::Fields(fields) => order_from_tokens(fields.iter().map(String::as_str)),
    };
    if sort.is_empty() { None } else { Some(sort) }
}

fn order_from_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Document {
    let mut sort = Document::new();
    for token in tokens {
        let token = token.trim();
        let (field, direction) = match token.strip_prefix('-') {
            Some(rest) => (rest.trim(), -1),
            None => (token, 1),
        };
        if field.is_empty() {
            continue;
        }
        sort.insert(field, direction);
    }
    sort
}

/// Resolve the effective sort document for a read.
///
/// Precedence: the `order` spec (consumed from `options`), then the
/// explicit `sort` document, then the schema's default order. Returns
/// `None` when none of them apply.
pub fn build_sort_options<S>(schema: &S, options: &mut CursorOptions) -> Option<Document>
where
    S: EntitySchema + ?Sized,
{
    if let Some(order) = options.order.take() {
        if let Some(sort) = build_order(Some(&order)) {
            return Some(sort);
        }
    }
    if let Some(sort) = options.sort.clone() {
        return Some(sort);
    }
    build_order(schema.default_order().as_ref())
}

/// Resolve cursor options for a read, folding the ordering spec into the
/// sort document.
pub fn build_find_options<S>(schema: &S, mut options: CursorOptions) -> CursorOptions
where
    S: EntitySchema + ?Sized,
{
    options.sort = build_sort_options(schema, &mut options);
    options
}
