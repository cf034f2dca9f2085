//! # Connection Pool
//!
//! Registry of named connection sources and their lazily-opened database
//! handles. The pool is passed to adapters explicitly; there is no global
//! connection state.
//!
//! - Register one [`StoreConfig`] per source name
//! - Handles are opened on first use and cached per source
//! - Cloning the pool shares the registry and the cache
//!
//! ## Example
//!
//! ```rust,ignore
//! let pool = ConnectionPool::new();
//! pool.register("default", StoreConfig::new(uri, "checkins"));
//!
//! let database = pool.connect("default").await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bson::doc;
use mongodb::{Client, Database};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Shared registry of connection sources.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    configs: RwLock<HashMap<String, StoreConfig>>,
    handles: RwLock<HashMap<String, Database>>,
}

impl ConnectionPool {
    /// Source name used by adapters constructed without an explicit source.
    pub const DEFAULT_SOURCE: &'static str = "default";

    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool with a single configuration registered under
    /// [`ConnectionPool::DEFAULT_SOURCE`].
    pub fn single(config: StoreConfig) -> Self {
        let pool = Self::new();
        pool.register(Self::DEFAULT_SOURCE, config);
        pool
    }

    /// Register a configuration under a source name.
    ///
    /// Replaces any existing configuration for that source and drops its
    /// cached handle so the next [`connect`](Self::connect) picks up the
    /// new settings.
    pub fn register(&self, source: impl Into<String>, config: StoreConfig) {
        let source = source.into();
        info!(source = %source, database = %config.database, "registered connection source");
        self.inner.handles.write().remove(&source);
        self.inner.configs.write().insert(source, config);
    }

    /// Look up the configuration for a source.
    pub fn config(&self, source: &str) -> Option<StoreConfig> {
        self.inner.configs.read().get(source).cloned()
    }

    /// Registered source names.
    pub fn sources(&self) -> Vec<String> {
        self.inner.configs.read().keys().cloned().collect()
    }

    /// Whether a source is configured for debug execution.
    pub fn debug_mode(&self, source: &str) -> bool {
        self.inner
            .configs
            .read()
            .get(source)
            .is_some_and(|config| config.debug)
    }

    /// Get the database handle for a source, opening it on first use.
    ///
    /// The driver connects lazily, so this succeeds without a reachable
    /// server; commands issued through the handle surface connectivity
    /// errors instead.
    ///
    /// # Errors
    ///
    /// [`StoreError::Config`] when the source is not registered or its
    /// configuration does not translate into client options.
    pub async fn connect(&self, source: &str) -> StoreResult<Database> {
        {
            let handles = self.inner.handles.read();
            if let Some(handle) = handles.get(source) {
                debug!(source, "reusing cached connection handle");
                return Ok(handle.clone());
            }
        }

        let config = self
            .config(source)
            .ok_or_else(|| StoreError::config(format!("no connection source named '{source}'")))?;

        let options = config.to_client_options().await?;
        let client = Client::with_options(options)
            .map_err(|e| StoreError::config(format!("failed to create client for '{source}': {e}")))?;
        let database = client.database(&config.database);

        let mut handles = self.inner.handles.write();
        if let Some(existing) = handles.get(source) {
            return Ok(existing.clone());
        }
        info!(source, database = %config.database, "opened connection handle");
        handles.insert(source.to_string(), database.clone());
        Ok(database)
    }

    /// Drop the cached handle for a source.
    ///
    /// Returns `true` when a handle was cached. The configuration stays
    /// registered, so the next [`connect`](Self::connect) reopens it.
    pub fn disconnect(&self, source: &str) -> bool {
        let removed = self.inner.handles.write().remove(source).is_some();
        if removed {
            info!(source, "dropped connection handle");
        }
        removed
    }

    /// Drop every cached handle.
    pub fn clear(&self) {
        self.inner.handles.write().clear();
    }

    /// Number of cached handles.
    pub fn cached(&self) -> usize {
        self.inner.handles.read().len()
    }

    /// Ping a source's database.
    ///
    /// Returns `false` when the source is unknown or the server does not
    /// answer.
    pub async fn is_healthy(&self, source: &str) -> bool {
        match self.connect(source).await {
            Ok(database) => database.run_command(doc! { "ping": 1 }, None).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_config(database: &str) -> StoreConfig {
        StoreConfig::new("mongodb://localhost:27017", database)
    }

    #[test]
    fn test_register_and_lookup() {
        let pool = ConnectionPool::new();
        pool.register("primary", test_config("checkins"));

        let config = pool.config("primary").unwrap();
        assert_eq!(config.database, "checkins");
        assert!(pool.config("missing").is_none());
        assert_eq!(pool.sources(), vec!["primary".to_string()]);
    }

    #[test]
    fn test_single_registers_default_source() {
        let pool = ConnectionPool::single(test_config("checkins"));
        assert!(pool.config(ConnectionPool::DEFAULT_SOURCE).is_some());
    }

    #[test]
    fn test_debug_mode() {
        let pool = ConnectionPool::new();
        let mut config = test_config("checkins");
        config.debug = true;
        pool.register("primary", config);

        assert!(pool.debug_mode("primary"));
        assert!(!pool.debug_mode("missing"));
    }

    #[tokio::test]
    async fn test_connect_caches_handle() {
        let pool = ConnectionPool::single(test_config("checkins"));

        let database = pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();
        assert_eq!(database.name(), "checkins");
        assert_eq!(pool.cached(), 1);

        let again = pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();
        assert_eq!(again.name(), "checkins");
        assert_eq!(pool.cached(), 1);
    }

    #[tokio::test]
    async fn test_connect_unknown_source() {
        let pool = ConnectionPool::new();
        let err = pool.connect("missing").await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_disconnect_and_clear() {
        let pool = ConnectionPool::single(test_config("checkins"));
        pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();

        assert!(pool.disconnect(ConnectionPool::DEFAULT_SOURCE));
        assert!(!pool.disconnect(ConnectionPool::DEFAULT_SOURCE));
        assert_eq!(pool.cached(), 0);

        pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();
        pool.clear();
        assert_eq!(pool.cached(), 0);
    }

    #[tokio::test]
    async fn test_register_replaces_cached_handle() {
        let pool = ConnectionPool::single(test_config("checkins"));
        pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();
        assert_eq!(pool.cached(), 1);

        pool.register(ConnectionPool::DEFAULT_SOURCE, test_config("archive"));
        assert_eq!(pool.cached(), 0);

        let database = pool.connect(ConnectionPool::DEFAULT_SOURCE).await.unwrap();
        assert_eq!(database.name(), "archive");
    }

    #[tokio::test]
    async fn test_is_healthy_unknown_source() {
        let pool = ConnectionPool::new();
        assert!(!pool.is_healthy("missing").await);
    }
}
