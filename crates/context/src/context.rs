//! The batching, caching context
//!
//! A [`Context`] is the handle applications use for every entity operation.
//! It owns one [`AutoBatcher`] per batched RPC kind and the session
//! [`Cache`]. Reads consult the cache first; writes update it after the RPC
//! succeeds.
//!
//! # Example
//!
//! ```ignore
//! let ctx = Context::new(conn, ContextConfig::for_app("app"));
//! let (a, b) = futures::join!(ctx.get(&key_a), ctx.get(&key_b)); // one get RPC
//! ```
//!
//! Contexts are single-threaded: clone the handle freely, but keep every clone
//! on the `LocalSet` that created its tasks.

use crate::batcher::{AutoBatcher, BatchReply, BatcherStats};
use crate::cache::{Cache, Lookup};
use futures::FutureExt;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use stratus_connection::Connection;
use stratus_core::{ContextConfig, Entity, Error, Key, Result};

/// Decides whether a key and its entity (or absence) may be cached
pub type CachePolicy = Rc<dyn Fn(&Key, Option<&Entity>) -> bool>;

pub(crate) struct ContextInner {
    pub(crate) conn: Rc<dyn Connection>,
    pub(crate) config: ContextConfig,
    get_batcher: AutoBatcher<Key, Option<Entity>>,
    put_batcher: AutoBatcher<Entity, Key>,
    delete_batcher: AutoBatcher<Key, ()>,
    pub(crate) cache: RefCell<Cache>,
    cache_policy: RefCell<Option<CachePolicy>>,
}

/// Batching, caching handle over a [`Connection`]
///
/// Cloning is cheap; clones share batchers and cache.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("transaction", &self.inner.conn.transaction())
            .field("cached", &self.cache_len())
            .finish()
    }
}

impl Context {
    /// Create a context over `conn`
    pub fn new(conn: Rc<dyn Connection>, config: ContextConfig) -> Self {
        Self::with_policy(conn, config, None)
    }

    pub(crate) fn with_policy(
        conn: Rc<dyn Connection>,
        config: ContextConfig,
        cache_policy: Option<CachePolicy>,
    ) -> Self {
        let rpc = config.rpc.clone();

        let c = conn.clone();
        let get_batcher = AutoBatcher::new("get", rpc.clone(), move |options, keys: Vec<Key>| {
            let conn = c.clone();
            async move { conn.get(&options, keys).await.map(BatchReply::Values) }.boxed_local()
        });

        let c = conn.clone();
        let put_batcher = AutoBatcher::new("put", rpc.clone(), move |options, entities: Vec<Entity>| {
            let conn = c.clone();
            async move { conn.put(&options, entities).await.map(BatchReply::Values) }.boxed_local()
        });

        let c = conn.clone();
        let delete_batcher = AutoBatcher::new("delete", rpc, move |options, keys: Vec<Key>| {
            let conn = c.clone();
            async move { conn.delete(&options, keys).await.map(|()| BatchReply::Ack) }.boxed_local()
        });

        Self {
            inner: Rc::new(ContextInner {
                conn,
                config,
                get_batcher,
                put_batcher,
                delete_batcher,
                cache: RefCell::new(Cache::new()),
                cache_policy: RefCell::new(cache_policy),
            }),
        }
    }

    /// Configuration this context was built with
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// The connection RPCs are issued on
    pub fn connection(&self) -> &Rc<dyn Connection> {
        &self.inner.conn
    }

    /// Whether this context is bound to a transaction
    pub fn in_transaction(&self) -> bool {
        self.inner.conn.transaction().is_some()
    }

    // ========================================================================
    // Entity operations
    // ========================================================================

    /// Fetch the entity stored under `key`
    ///
    /// Answers from the cache when the key is cached (a tombstone answers
    /// `None` without an RPC). Otherwise the key joins the current get batch
    /// as soon as this is called, whether or not the future is polled.
    pub fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Entity>>> + 'static {
        let known = self.inner.cache.borrow().lookup(key).known();
        let request = match known {
            Some(_) => None,
            None => Some(self.inner.get_batcher.add(key.clone())),
        };
        let ctx = self.clone();
        let key = key.clone();
        async move {
            let Some(request) = request else {
                return Ok::<_, Error>(known.unwrap_or_default());
            };
            let entity = request
                .await?
                .ok_or_else(|| Error::Internal("get batch was acknowledged without values".into()))?;
            if ctx.should_cache(&key, entity.as_ref()) {
                ctx.inner.cache.borrow_mut().insert(key, entity.clone());
            }
            Ok(entity)
        }
    }

    /// Store `entity`, returning its key
    ///
    /// An entity without a key gets an incomplete key in the configured
    /// default app. The write is queued when this is called; a dropped future
    /// still sends it. When the store assigns a different key (completing an
    /// incomplete one), `entity` is updated to carry it.
    pub fn put<'a>(&self, entity: &'a mut Entity) -> impl Future<Output = Result<Key>> + 'a {
        if entity.key().is_none() {
            entity.set_key(Key::incomplete(
                self.inner.config.default_app.clone(),
                entity.kind(),
            ));
        }
        let request = self.inner.put_batcher.add(entity.clone());
        let ctx = self.clone();
        async move {
            let key = request
                .await?
                .ok_or_else(|| Error::Internal("put batch was acknowledged without keys".into()))?;
            if entity.key() != Some(&key) {
                tracing::info!(
                    old = ?entity.key().map(ToString::to_string),
                    new = %key,
                    "replacing entity key"
                );
                entity.set_key(key.clone());
            }
            if ctx.should_cache(&key, Some(&*entity)) {
                ctx.inner
                    .cache
                    .borrow_mut()
                    .insert(key.clone(), Some(entity.clone()));
            }
            Ok::<_, Error>(key)
        }
    }

    /// Delete the entity stored under `key`
    ///
    /// Queued when called, like [`put`](Self::put). A cached key is
    /// tombstoned once the delete succeeds; an uncached key stays uncached.
    pub fn delete(&self, key: &Key) -> impl Future<Output = Result<()>> + 'static {
        let request = self.inner.delete_batcher.add(key.clone());
        let ctx = self.clone();
        let key = key.clone();
        async move {
            request.await?;
            ctx.inner.cache.borrow_mut().tombstone_if_present(&key);
            Ok::<_, Error>(())
        }
    }

    /// Reserve numeric ids for the kind and parent of `key`
    ///
    /// Exactly one of `size` or `max` must be given. Not batched and not
    /// cached.
    pub async fn allocate_ids(
        &self,
        key: &Key,
        size: Option<u64>,
        max: Option<u64>,
    ) -> Result<(u64, u64)> {
        self.inner
            .conn
            .allocate_ids(&self.inner.config.rpc, key, size, max)
            .await
    }

    /// Dispatch every queued request and wait for all in-flight batches
    pub async fn flush(&self) {
        futures::join!(
            self.inner.get_batcher.flush(),
            self.inner.put_batcher.flush(),
            self.inner.delete_batcher.flush(),
        );
    }

    /// Counters of the get, put and delete batchers
    pub fn batcher_stats(&self) -> [(&'static str, BatcherStats); 3] {
        [
            (self.inner.get_batcher.name(), self.inner.get_batcher.stats()),
            (self.inner.put_batcher.name(), self.inner.put_batcher.stats()),
            (self.inner.delete_batcher.name(), self.inner.delete_batcher.stats()),
        ]
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Replace the cache policy; the default caches everything
    pub fn set_cache_policy<F>(&self, policy: F)
    where
        F: Fn(&Key, Option<&Entity>) -> bool + 'static,
    {
        *self.inner.cache_policy.borrow_mut() = Some(Rc::new(policy));
    }

    /// Whether `key` with `value` may be cached under the current policy
    pub fn should_cache(&self, key: &Key, value: Option<&Entity>) -> bool {
        let policy = self.inner.cache_policy.borrow().clone();
        policy.map_or(true, |policy| policy(key, value))
    }

    pub(crate) fn cache_policy(&self) -> Option<CachePolicy> {
        self.inner.cache_policy.borrow().clone()
    }

    /// Number of cache entries, tombstones included
    pub fn cache_len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// What the cache holds for `key`
    pub fn cached(&self, key: &Key) -> Lookup {
        self.inner.cache.borrow().lookup(key)
    }

    /// Drop every cache entry
    pub fn clear_cache(&self) {
        self.inner.cache.borrow_mut().clear();
    }

    pub(crate) fn take_cache(&self) -> Cache {
        std::mem::take(&mut *self.inner.cache.borrow_mut())
    }

    pub(crate) fn merge_cache(&self, other: Cache) {
        self.inner.cache.borrow_mut().merge(other);
    }
}
