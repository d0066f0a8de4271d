//! Mapping a callback over query results
//!
//! [`Context::map_query`] pages through a query on a driver task and hands
//! each result to a callback, reconciling it against the session cache
//! first:
//!
//! | Cache state for the key | Action                                   |
//! |-------------------------|------------------------------------------|
//! | tombstone               | skip the result, count a deleted conflict|
//! | entity, different       | deliver the cached entity instead        |
//! | entity, equal           | deliver                                  |
//! | nothing                 | cache (if the policy allows) and deliver |
//!
//! The next page is requested before the current page is processed.

use crate::context::Context;
use crate::multi::{MultiFuture, QueryResults, QueryStats};
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::future::Future;
use stratus_connection::{Query, QueryOptions};
use stratus_core::{Entity, Error, Result};
use tokio::task::JoinHandle;

/// What a query callback produced for one entity
pub enum MapOutput<V> {
    /// A value, reduced immediately
    Value(V),
    /// A value still being computed; runs concurrently with the query
    Pending(LocalBoxFuture<'static, Result<V>>),
    /// The item failed; it is logged, counted and skipped
    Failed(Error),
}

impl<V> MapOutput<V> {
    /// Wrap a future as a pending output
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<V>> + 'static,
    {
        MapOutput::Pending(Box::pin(future))
    }
}

impl<V> From<Result<V>> for MapOutput<V> {
    fn from(result: Result<V>) -> Self {
        match result {
            Ok(value) => MapOutput::Value(value),
            Err(error) => MapOutput::Failed(error),
        }
    }
}

impl Context {
    /// Map `callback` over every result of `query`, folding the outputs with
    /// `reducer` starting from `initial`
    ///
    /// Returns the combined result and the driver task. The driver resolves
    /// to the number of entities delivered to the callback; a paging error
    /// fails both the driver and the combined result.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet`.
    pub fn map_query<Q, F, V, R, G>(
        &self,
        query: Q,
        callback: F,
        options: QueryOptions,
        reducer: G,
        initial: R,
    ) -> (QueryResults<R>, JoinHandle<Result<usize>>)
    where
        Q: Query + 'static,
        F: FnMut(Entity) -> MapOutput<V> + 'static,
        V: 'static,
        R: 'static,
        G: FnMut(R, V) -> R + 'static,
    {
        let (multi, results) = MultiFuture::new(initial, reducer);
        let ctx = self.clone();
        let driver =
            tokio::task::spawn_local(async move { ctx.drive_query(query, callback, options, multi).await });
        (results, driver)
    }

    /// [`Context::map_query`] collecting every output into a `Vec`
    ///
    /// Immediate values come first in delivery order, followed by pending
    /// values in the order their entities were delivered.
    pub fn map_query_collect<Q, F, V>(
        &self,
        query: Q,
        callback: F,
        options: QueryOptions,
    ) -> (QueryResults<Vec<V>>, JoinHandle<Result<usize>>)
    where
        Q: Query + 'static,
        F: FnMut(Entity) -> MapOutput<V> + 'static,
        V: 'static,
    {
        self.map_query(
            query,
            callback,
            options,
            |mut acc: Vec<V>, value| {
                acc.push(value);
                acc
            },
            Vec::new(),
        )
    }

    async fn drive_query<Q, F, V, R>(
        &self,
        query: Q,
        mut callback: F,
        options: QueryOptions,
        mut multi: MultiFuture<V, R>,
    ) -> Result<usize>
    where
        Q: Query,
        F: FnMut(Entity) -> MapOutput<V>,
        V: 'static,
        R: 'static,
    {
        let mut batch = match query.run(self.connection().clone(), &options).await {
            Ok(batch) => batch,
            Err(error) => {
                multi.fail(error.clone());
                return Err(error);
            }
        };

        let mut delivered = 0;
        loop {
            let (results, cursor) = batch.into_parts();
            let next_page = cursor.map(|cursor| {
                let options = options.clone();
                tokio::task::spawn_local(async move { cursor.next(&options).await })
            });

            for entity in results {
                let Some(entity) = self.reconcile(entity, multi.stats()) else {
                    continue;
                };
                delivered += 1;
                multi.stats().borrow_mut().delivered += 1;
                match callback(entity) {
                    MapOutput::Value(value) => multi.process_value(value),
                    MapOutput::Pending(future) => multi.add_dependent(future),
                    MapOutput::Failed(error) => multi.record_failure(&error),
                }
            }

            let Some(next_page) = next_page else {
                break;
            };
            let fetched = match next_page.await {
                Ok(fetched) => fetched,
                Err(join_error) => Err(Error::Internal(format!(
                    "query page task did not finish: {}",
                    join_error
                ))),
            };
            batch = match fetched {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!(error = %error, delivered, "query paging failed");
                    multi.fail(error.clone());
                    return Err(error);
                }
            };
        }

        tracing::debug!(delivered, pending = multi.dependent_count(), "query exhausted");
        multi.complete();
        Ok(delivered)
    }

    /// Reconcile a query result with the cache; `None` drops the result
    ///
    /// Entities are compared with `PartialEq`, so a cached entity holding a
    /// NaN float property never equals the query result and is always
    /// counted as a modified conflict.
    fn reconcile(&self, entity: Entity, stats: &RefCell<QueryStats>) -> Option<Entity> {
        let Some(key) = entity.key().cloned() else {
            return Some(entity);
        };
        let cached = self.inner.cache.borrow().lookup(&key).known();
        match cached {
            Some(None) => {
                tracing::info!(key = %key, "query result was deleted in this session, skipping");
                stats.borrow_mut().deleted_conflicts += 1;
                None
            }
            Some(Some(cached)) => {
                if cached != entity {
                    tracing::info!(key = %key, "query result was modified in this session, using cached entity");
                    stats.borrow_mut().modified_conflicts += 1;
                }
                Some(cached)
            }
            None => {
                if self.should_cache(&key, Some(&entity)) {
                    self.inner
                        .cache
                        .borrow_mut()
                        .insert(key, Some(entity.clone()));
                }
                Some(entity)
            }
        }
    }
}
