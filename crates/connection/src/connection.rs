//! The connection interface
//!
//! A [`Connection`] performs the actual RPCs against the remote store. Every
//! data operation is batched: get, put and delete each take a list of
//! arguments and answer with a list of results in the same order.
//!
//! Connections are used from a single thread. Methods take `&self` and the
//! returned futures are not `Send`; implementations use interior mutability
//! where they keep state (a transactional connection tracks its transaction).

use crate::query::{QueryFilter, QueryOptions, QueryPage};
use async_trait::async_trait;
use std::fmt;
use std::rc::Rc;
use stratus_core::{Entity, Key, Result, RpcOptions};
use uuid::Uuid;

/// Handle of a transaction started with [`Connection::begin_transaction`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: Uuid,
    app: String,
}

impl TransactionHandle {
    /// Create a handle for a new transaction in `app`
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            app: app.into(),
        }
    }

    /// Unique transaction id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Application the transaction runs in
    pub fn app(&self) -> &str {
        &self.app
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.id)
    }
}

/// Batched RPC interface to the remote store
///
/// # Ordering
///
/// `get` and `put` must answer with exactly one result per argument, in
/// argument order. Callers treat any other length as a malformed reply.
#[async_trait(?Send)]
pub trait Connection {
    /// Fetch entities; `None` marks a key with no stored entity
    async fn get(&self, options: &RpcOptions, keys: Vec<Key>) -> Result<Vec<Option<Entity>>>;

    /// Store entities, returning their (possibly newly completed) keys
    async fn put(&self, options: &RpcOptions, entities: Vec<Entity>) -> Result<Vec<Key>>;

    /// Delete entities; deleting a missing key is not an error
    async fn delete(&self, options: &RpcOptions, keys: Vec<Key>) -> Result<()>;

    /// Reserve a range of numeric ids for the kind and parent of `key`
    ///
    /// Exactly one of `size` (number of ids) or `max` (reserve every id up to
    /// and including `max`) is given. Returns the inclusive `(lo, hi)` range.
    async fn allocate_ids(
        &self,
        options: &RpcOptions,
        key: &Key,
        size: Option<u64>,
        max: Option<u64>,
    ) -> Result<(u64, u64)>;

    /// Fetch one page of query results
    async fn fetch_page(
        &self,
        options: &QueryOptions,
        filter: &QueryFilter,
        start_after: Option<Key>,
    ) -> Result<QueryPage>;

    /// Start a transaction in `app`
    async fn begin_transaction(&self, options: &RpcOptions, app: &str) -> Result<TransactionHandle>;

    /// A connection whose operations run inside `transaction`
    ///
    /// When `entity_group` is given, the transactional connection only
    /// accepts keys inside that group.
    fn transactional(
        &self,
        transaction: TransactionHandle,
        entity_group: Option<Key>,
    ) -> Result<Rc<dyn Connection>>;

    /// Commit this connection's transaction
    ///
    /// `Ok(false)` means the commit was rejected by optimistic concurrency
    /// control; the caller may retry with a fresh transaction.
    async fn commit(&self, options: &RpcOptions) -> Result<bool>;

    /// Roll back this connection's transaction
    async fn rollback(&self, options: &RpcOptions) -> Result<()>;

    /// The transaction this connection is bound to, if any
    fn transaction(&self) -> Option<TransactionHandle> {
        None
    }
}
