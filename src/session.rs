//! Session entry point for Stratus.
//!
//! A [`Session`] bundles a validated configuration with a [`Context`] over a
//! connection. It dereferences to the context, so every context operation is
//! available directly on the session.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use stratus_connection::{Connection, MemoryConnection, MemoryStore};
use stratus_context::Context;
use stratus_core::{ContextConfig, Error, ReadPolicy, Result};

/// A configured client session.
///
/// # Example
///
/// ```ignore
/// use stratus::prelude::*;
///
/// // Against a real connection
/// let session = Session::builder()
///     .config_file("stratus.toml")
///     .connect(conn)?;
///
/// // In-memory, for tests
/// let session = Session::ephemeral()?;
/// session.put(&mut entity).await?;
/// session.close().await;
/// ```
pub struct Session {
    context: Context,
    store: Option<Rc<MemoryStore>>,
}

impl Session {
    /// Connect with default settings.
    pub fn connect(conn: Rc<dyn Connection>) -> Result<Self> {
        Self::builder().connect(conn)
    }

    /// Create a session over a fresh in-memory store.
    ///
    /// Nothing leaves the process and all data is lost when the store is
    /// dropped. Use for tests and examples.
    pub fn ephemeral() -> Result<Self> {
        Self::builder().ephemeral()
    }

    /// Create a builder for session configuration.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// The context all operations go through.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The in-memory store, for sessions created with [`Session::ephemeral`].
    pub fn store(&self) -> Option<&Rc<MemoryStore>> {
        self.store.as_ref()
    }

    /// Check if this session runs against an in-memory store.
    pub fn is_ephemeral(&self) -> bool {
        self.store.is_some()
    }

    /// Dispatch every queued request and wait for in-flight batches.
    ///
    /// After `close()` returns, every write issued through this session has
    /// reached the connection.
    pub async fn close(&self) {
        self.context.flush().await;
        tracing::debug!(cached = self.context.cache_len(), "session closed");
    }

    /// Get session metrics.
    pub fn metrics(&self) -> SessionMetrics {
        let mut metrics = SessionMetrics {
            cached: self.context.cache_len(),
            ..SessionMetrics::default()
        };
        for (_, stats) in self.context.batcher_stats() {
            metrics.batches += stats.batches;
            metrics.batched_items += stats.items;
        }
        metrics
    }
}

impl Deref for Session {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

/// Session metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Batched RPCs issued by the get, put and delete batchers
    pub batches: u64,
    /// Requests carried by those RPCs
    pub batched_items: u64,
    /// Cache entries, tombstones included
    pub cached: usize,
}

impl SessionMetrics {
    /// Average requests per batched RPC, 0.0 before the first batch
    pub fn batching_ratio(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.batched_items as f64 / self.batches as f64
        }
    }
}

/// Builder for session configuration.
///
/// Settings given on the builder override those read from a config file,
/// regardless of call order.
///
/// # Example
///
/// ```ignore
/// let session = Session::builder()
///     .app("guestbook")
///     .transaction_retries(5)
///     .deadline(Duration::from_secs(2))
///     .connect(conn)?;
/// ```
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: Option<ContextConfig>,
    config_path: Option<PathBuf>,
    app: Option<String>,
    transaction_retries: Option<u32>,
    deadline: Option<Duration>,
    read_policy: Option<ReadPolicy>,
}

impl SessionBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an explicit configuration.
    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Start from a TOML configuration file, read when the session is built.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the default application id.
    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Set the commit retries after the first transaction attempt.
    pub fn transaction_retries(mut self, retries: u32) -> Self {
        self.transaction_retries = Some(retries);
        self
    }

    /// Set the per-RPC deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the read consistency.
    pub fn read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = Some(policy);
        self
    }

    /// Resolve and validate the configuration.
    pub fn build_config(&self) -> Result<ContextConfig> {
        let mut config = match (&self.config_path, &self.config) {
            (Some(path), _) => ContextConfig::from_file(path)?,
            (None, Some(config)) => config.clone(),
            (None, None) => ContextConfig::default(),
        };
        if let Some(app) = &self.app {
            config.default_app = app.clone();
        }
        if let Some(retries) = self.transaction_retries {
            config.transaction_retries = retries;
        }
        if let Some(deadline) = self.deadline {
            let millis = u64::try_from(deadline.as_millis()).map_err(|_| {
                Error::Config(format!("deadline of {:?} does not fit in milliseconds", deadline))
            })?;
            config.rpc.deadline_ms = Some(millis);
        }
        if let Some(policy) = self.read_policy {
            config.rpc.read_policy = policy;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a session over `conn`.
    pub fn connect(self, conn: Rc<dyn Connection>) -> Result<Session> {
        let config = self.build_config()?;
        tracing::debug!(app = %config.default_app, "session opened");
        Ok(Session {
            context: Context::new(conn, config),
            store: None,
        })
    }

    /// Build a session over a fresh in-memory store.
    pub fn ephemeral(self) -> Result<Session> {
        let store = MemoryStore::new();
        let mut session = self.connect(MemoryConnection::new(store.clone()))?;
        session.store = Some(store);
        Ok(session)
    }
}
