//! # Store Configuration
//!
//! Connection configuration for a registered source:
//!
//! - Connection string and target database
//! - Optional server tuning ([`ServerOptions`])
//! - Debug execution mode for surfacing caller bugs early
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = StoreConfig::builder()
//!     .uri("mongodb://localhost:27017")
//!     .database("checkins")
//!     .app_name("vicinity")
//!     .build()?;
//! ```

use std::time::Duration;

use mongodb::options::ClientOptions;

use crate::error::{StoreError, StoreResult};

/// Configuration for one connection source.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection string.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Application name reported to the server.
    pub app_name: Option<String>,
    /// When set, guard violations and unexpected failures panic instead
    /// of returning errors. Intended for tests and local development.
    pub debug: bool,
    /// Server tuning. `None` applies [`ServerOptions::default`].
    pub server: Option<ServerOptions>,
}

/// Driver-level server tuning.
///
/// A caller-supplied value replaces the defaults wholesale; fields left
/// `None` here stay unset on the driver rather than falling back to the
/// default profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Minimum connections kept open per server.
    pub min_pool_size: Option<u32>,
    /// Maximum connections per server.
    pub max_pool_size: Option<u32>,
    /// How long an idle connection may sit in the pool.
    pub max_idle_time: Option<Duration>,
    /// TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// How long to wait for a suitable server.
    pub server_selection_timeout: Option<Duration>,
    /// Bypass topology discovery and connect directly.
    pub direct_connection: Option<bool>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            direct_connection: None,
        }
    }
}

/// Resolve the effective server options for a config.
pub fn resolve_server_options(custom: Option<&ServerOptions>) -> ServerOptions {
    match custom {
        Some(options) => options.clone(),
        None => ServerOptions::default(),
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: String::new(),
            app_name: None,
            debug: false,
            server: None,
        }
    }
}

impl StoreConfig {
    /// Create a configuration with a connection string and database name.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Create a configuration builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Translate this configuration into driver client options.
    ///
    /// # Errors
    ///
    /// [`StoreError::Config`] when the database name is missing or the
    /// connection string does not parse.
    pub async fn to_client_options(&self) -> StoreResult<ClientOptions> {
        if self.database.is_empty() {
            return Err(StoreError::config("database name is required"));
        }

        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| StoreError::config(format!("invalid connection string: {e}")))?;

        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }

        let server = resolve_server_options(self.server.as_ref());
        options.min_pool_size = server.min_pool_size;
        options.max_pool_size = server.max_pool_size;
        options.max_idle_time = server.max_idle_time;
        options.connect_timeout = server.connect_timeout;
        options.server_selection_timeout = server.server_selection_timeout;
        options.direct_connection = server.direct_connection;

        Ok(options)
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the connection string.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.config.app_name = Some(app_name.into());
        self
    }

    /// Enable or disable debug execution mode.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Set server tuning options.
    pub fn server(mut self, server: ServerOptions) -> Self {
        self.config.server = Some(server);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// [`StoreError::Config`] when the database name is missing.
    pub fn build(self) -> StoreResult<StoreConfig> {
        if self.config.database.is_empty() {
            return Err(StoreError::config("database name is required"));
        }
        Ok(self.config)
    }
}
