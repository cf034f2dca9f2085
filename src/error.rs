//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while translating and issuing store operations.
///
/// The taxonomy is deliberately small so call sites can match on it:
/// [`StoreError::Guard`] fails before any I/O, [`StoreError::Driver`] is a
/// command the store rejected, [`StoreError::Config`] covers pool and
/// configuration construction, and [`StoreError::Unexpected`] is everything
/// else on the same rejection path as `Driver`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The resolved predicate or request document was empty.
    ///
    /// Raised synchronously before the driver is touched; on a document
    /// store an empty filter matches the whole collection.
    #[error("guard rejected {operation} on '{collection}': {reason}")]
    Guard {
        /// Operation that was being prepared.
        operation: &'static str,
        /// Target collection.
        collection: String,
        /// Which guard fired.
        reason: GuardReason,
    },

    /// The underlying store rejected the command.
    #[error("store error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Configuration or pool construction error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other failure: BSON conversion, unparseable identifiers,
    /// missing schema capabilities.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// The invariant an operation guard found violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardReason {
    /// The query predicate resolved to an empty document.
    EmptyQuery,
    /// The request document resolved to an empty document.
    EmptyDocument,
}

impl std::fmt::Display for GuardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyQuery => write!(f, "empty query predicate"),
            Self::EmptyDocument => write!(f, "empty request document"),
        }
    }
}

impl StoreError {
    /// Create a guard violation.
    pub fn guard(
        operation: &'static str,
        collection: impl Into<String>,
        reason: GuardReason,
    ) -> Self {
        Self::Guard {
            operation,
            collection: collection.into(),
            reason,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an unexpected error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Check if this is a guard violation.
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Guard { .. })
    }

    /// Check if the store rejected the command.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this is an unexpected error.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Unexpected(_))
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Unexpected(format!("bson serialization failed: {err}"))
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        StoreError::Unexpected(format!("bson deserialization failed: {err}"))
    }
}

impl From<bson::oid::Error> for StoreError {
    fn from(err: bson::oid::Error) -> Self {
        StoreError::Unexpected(format!("invalid object id: {err}"))
    }
}
