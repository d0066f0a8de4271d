//! Combined result of a fan-out
//!
//! A [`MultiFuture`] folds many values into one result with a reducer. Values
//! arrive two ways:
//!
//! - [`MultiFuture::process_value`]: reduced immediately
//! - [`MultiFuture::add_dependent`]: a future spawned on the local set and
//!   reduced once it resolves
//!
//! After [`MultiFuture::complete`], the dependents are awaited in the order
//! they were added and the final accumulator is delivered to the paired
//! [`QueryResults`]. A dependent that fails is logged, counted in
//! [`QueryStats::callback_failures`] and skipped.

use futures::channel::oneshot;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use stratus_core::{Error, Result};
use tokio::task::JoinHandle;

/// Counters for one query mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Entities handed to the callback
    pub delivered: u64,
    /// Results skipped because the cache holds a tombstone for their key
    pub deleted_conflicts: u64,
    /// Results replaced by a differing cached entity
    pub modified_conflicts: u64,
    /// Callback results that failed and were skipped
    pub callback_failures: u64,
}

/// Reducer-backed combined result
pub struct MultiFuture<V, R> {
    acc: Option<R>,
    reducer: Box<dyn FnMut(R, V) -> R>,
    dependents: Vec<JoinHandle<Result<V>>>,
    stats: Rc<RefCell<QueryStats>>,
    sender: oneshot::Sender<Result<R>>,
}

impl<V: 'static, R: 'static> MultiFuture<V, R> {
    /// Create a combined result starting from `initial`
    pub fn new<G>(initial: R, reducer: G) -> (Self, QueryResults<R>)
    where
        G: FnMut(R, V) -> R + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let stats = Rc::new(RefCell::new(QueryStats::default()));
        let multi = Self {
            acc: Some(initial),
            reducer: Box::new(reducer),
            dependents: Vec::new(),
            stats: stats.clone(),
            sender,
        };
        (multi, QueryResults { receiver, stats })
    }

    /// Reduce `value` into the accumulator now
    pub fn process_value(&mut self, value: V) {
        if let Some(acc) = self.acc.take() {
            self.acc = Some((self.reducer)(acc, value));
        }
    }

    /// Spawn `future` and reduce its value once it resolves
    pub fn add_dependent<F>(&mut self, future: F)
    where
        F: Future<Output = Result<V>> + 'static,
    {
        self.dependents.push(tokio::task::spawn_local(future));
    }

    /// Count and log a failed item
    pub fn record_failure(&self, error: &Error) {
        tracing::warn!(error = %error, "query callback failed, skipping");
        self.stats.borrow_mut().callback_failures += 1;
    }

    /// Dependents added so far
    pub fn dependent_count(&self) -> usize {
        self.dependents.len()
    }

    pub(crate) fn stats(&self) -> &Rc<RefCell<QueryStats>> {
        &self.stats
    }

    /// No more values will be added; deliver the result once dependents settle
    pub fn complete(self) {
        let MultiFuture {
            mut acc,
            mut reducer,
            dependents,
            stats,
            sender,
        } = self;

        let finish = async move {
            for dependent in dependents {
                let value = match dependent.await {
                    Ok(Ok(value)) => value,
                    Ok(Err(error)) => {
                        tracing::warn!(error = %error, "query callback failed, skipping");
                        stats.borrow_mut().callback_failures += 1;
                        continue;
                    }
                    Err(join_error) => {
                        tracing::warn!(error = %join_error, "query callback task did not finish");
                        stats.borrow_mut().callback_failures += 1;
                        continue;
                    }
                };
                if let Some(current) = acc.take() {
                    acc = Some(reducer(current, value));
                }
            }
            let result = acc.ok_or_else(|| Error::Internal("query accumulator lost".into()));
            let _ = sender.send(result);
        };
        tokio::task::spawn_local(finish);
    }

    /// Fail the combined result; dependents keep running but are ignored
    pub fn fail(self, error: Error) {
        let _ = self.sender.send(Err(error));
    }
}

/// The combined result of a query mapping
///
/// Resolves to the final accumulator once the query is exhausted and every
/// pending callback has settled.
pub struct QueryResults<R> {
    receiver: oneshot::Receiver<Result<R>>,
    stats: Rc<RefCell<QueryStats>>,
}

impl<R> QueryResults<R> {
    /// Counters so far; final once the result has resolved
    pub fn stats(&self) -> QueryStats {
        *self.stats.borrow()
    }
}

impl<R> Future for QueryResults<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Internal("query driver dropped".into())))
        })
    }
}
