//! Request coalescing
//!
//! An [`AutoBatcher`] turns many single-item requests of one RPC kind into one
//! multi-item RPC. Requests added before the issuing task yields land in the
//! same batch:
//!
//! ```text
//! add(a) ──┐
//! add(b) ──┼─► pending [a, b, c] ──(flush task)──► rpc([a, b, c]) ──► [ra, rb, rc]
//! add(c) ──┘                                                            │  │  │
//!                                              future(a) ◄──────────────┘  │  │
//!                                              future(b) ◄─────────────────┘  │
//!                                              future(c) ◄────────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! The first `add` on an empty queue spawns one flush task on the current
//! `LocalSet`. The task yields once before dispatching, so it runs after every
//! task that was already runnable. Further adds on a non-empty queue never
//! spawn a second task.
//!
//! One yield is all the batcher waits for. A task that yields more than once
//! before its `add` misses the batch and starts the next one.
//!
//! ## Failure policy
//!
//! - RPC error: every request in the batch fails with a clone of the error
//! - `Values` reply of the wrong length: every request fails with
//!   [`Error::BatchMismatch`]
//!
//! A batch never resolves some requests and drops others.

use futures::channel::oneshot;
use futures::future::{join_all, LocalBoxFuture, Shared};
use futures::FutureExt;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use stratus_core::{Error, Result, RpcOptions};

/// Reply of a batched RPC
#[derive(Debug, Clone, PartialEq)]
pub enum BatchReply<R> {
    /// One result per request, in request order
    Values(Vec<R>),
    /// Acknowledgement without values (delete-style RPCs)
    Ack,
}

/// The batched RPC an [`AutoBatcher`] is bound to
pub type BatchMethod<A, R> =
    Rc<dyn Fn(RpcOptions, Vec<A>) -> LocalBoxFuture<'static, Result<BatchReply<R>>>>;

type Pending<A, R> = (oneshot::Sender<Result<Option<R>>>, A);
type Marker = Shared<oneshot::Receiver<()>>;

/// Counters for one batcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Flush tasks spawned
    pub scheduled: u64,
    /// Batched RPCs issued
    pub batches: u64,
    /// Requests carried by those RPCs
    pub items: u64,
}

struct BatcherState<A, R> {
    todo: Vec<Pending<A, R>>,
    running: FxHashMap<u64, Marker>,
    next_marker: u64,
    stats: BatcherStats,
}

struct BatcherInner<A, R> {
    name: &'static str,
    method: BatchMethod<A, R>,
    options: RpcOptions,
    state: RefCell<BatcherState<A, R>>,
}

/// Coalesces requests of one RPC kind into batched calls
///
/// Cloning is cheap and yields a handle to the same queue.
pub struct AutoBatcher<A, R> {
    inner: Rc<BatcherInner<A, R>>,
}

impl<A, R> Clone for AutoBatcher<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: 'static, R: 'static> AutoBatcher<A, R> {
    /// Create a batcher bound to `method`, passing `options` to every call
    ///
    /// `name` identifies the batcher in logs.
    pub fn new<F>(name: &'static str, options: RpcOptions, method: F) -> Self
    where
        F: Fn(RpcOptions, Vec<A>) -> LocalBoxFuture<'static, Result<BatchReply<R>>> + 'static,
    {
        Self {
            inner: Rc::new(BatcherInner {
                name,
                method: Rc::new(method),
                options,
                state: RefCell::new(BatcherState {
                    todo: Vec::new(),
                    running: FxHashMap::default(),
                    next_marker: 0,
                    stats: BatcherStats::default(),
                }),
            }),
        }
    }

    /// Queue a request
    ///
    /// Never suspends: the request is queued before this returns. The returned
    /// future resolves to `Some(result)` for a `Values` reply and `None` for an
    /// `Ack` reply.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet` when the queue was
    /// empty, since the flush task cannot be spawned.
    pub fn add(&self, arg: A) -> impl Future<Output = Result<Option<R>>> + 'static {
        let (sender, receiver) = oneshot::channel();
        let schedule = {
            let mut state = self.inner.state.borrow_mut();
            let was_empty = state.todo.is_empty();
            state.todo.push((sender, arg));
            if was_empty {
                state.stats.scheduled += 1;
            }
            was_empty
        };
        if schedule {
            let batcher = self.clone();
            tokio::task::spawn_local(async move {
                tokio::task::yield_now().await;
                batcher.dispatch();
            });
        }
        async move { receiver.await.unwrap_or(Err(Error::BatchDropped)) }
    }

    /// Issue the queued requests as one RPC; no-op on an empty queue
    fn dispatch(&self) {
        let todo = {
            let mut state = self.inner.state.borrow_mut();
            if state.todo.is_empty() {
                return;
            }
            std::mem::take(&mut state.todo)
        };
        let (senders, args): (Vec<_>, Vec<_>) = todo.into_iter().unzip();
        tracing::debug!(batcher = self.inner.name, items = args.len(), "dispatching batch");

        let rpc = (self.inner.method)(self.inner.options.clone(), args);
        let (done, marker) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.borrow_mut();
            let id = state.next_marker;
            state.next_marker += 1;
            state.running.insert(id, marker.shared());
            state.stats.batches += 1;
            state.stats.items += senders.len() as u64;
            id
        };

        let batcher = self.clone();
        tokio::task::spawn_local(async move {
            let reply = rpc.await;
            batcher.complete(id, done, senders, reply);
        });
    }

    /// Retire the marker and fan the reply out to the batch's requests
    fn complete(
        &self,
        id: u64,
        done: oneshot::Sender<()>,
        senders: Vec<oneshot::Sender<Result<Option<R>>>>,
        reply: Result<BatchReply<R>>,
    ) {
        self.inner.state.borrow_mut().running.remove(&id);
        let _ = done.send(());

        match reply {
            Ok(BatchReply::Ack) => {
                for sender in senders {
                    let _ = sender.send(Ok(None));
                }
            }
            Ok(BatchReply::Values(values)) if values.len() == senders.len() => {
                for (sender, value) in senders.into_iter().zip(values) {
                    let _ = sender.send(Ok(Some(value)));
                }
            }
            Ok(BatchReply::Values(values)) => {
                let error = Error::BatchMismatch {
                    expected: senders.len(),
                    actual: values.len(),
                };
                tracing::warn!(batcher = self.inner.name, error = %error, "malformed batch reply");
                fail_all(senders, error);
            }
            Err(error) => {
                tracing::warn!(batcher = self.inner.name, error = %error, "batch rpc failed");
                fail_all(senders, error);
            }
        }
    }

    /// Dispatch everything queued and wait until no RPC is in flight
    ///
    /// Returns only once the queue and the in-flight set are both empty,
    /// including batches started by requests added while waiting.
    pub async fn flush(&self) {
        loop {
            let pending = !self.inner.state.borrow().todo.is_empty();
            if pending {
                self.dispatch();
            }
            let running: Vec<(u64, Marker)> = self
                .inner
                .state
                .borrow()
                .running
                .iter()
                .map(|(id, marker)| (*id, marker.clone()))
                .collect();
            if running.is_empty() {
                if self.inner.state.borrow().todo.is_empty() {
                    return;
                }
                continue;
            }
            let (ids, markers): (Vec<_>, Vec<_>) = running.into_iter().unzip();
            let outcomes = join_all(markers).await;

            // A marker whose task was dropped never completes; forget it.
            let mut state = self.inner.state.borrow_mut();
            for (id, outcome) in ids.into_iter().zip(outcomes) {
                if outcome.is_err() {
                    state.running.remove(&id);
                }
            }
        }
    }

    /// Requests queued but not yet dispatched
    pub fn pending_len(&self) -> usize {
        self.inner.state.borrow().todo.len()
    }

    /// RPCs dispatched but not yet completed
    pub fn running_len(&self) -> usize {
        self.inner.state.borrow().running.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> BatcherStats {
        self.inner.state.borrow().stats
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

fn fail_all<R>(senders: Vec<oneshot::Sender<Result<Option<R>>>>, error: Error) {
    for sender in senders {
        let _ = sender.send(Err(error.clone()));
    }
}
