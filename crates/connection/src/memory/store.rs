//! In-memory entity store
//!
//! Backs [`MemoryConnection`](super::MemoryConnection). Data is sharded per
//! application id, with an `FxHashMap` inside each shard for O(1) lookups.
//! Every entity group (root key) carries a version counter that is bumped on
//! each write to the group; transactional connections compare these versions
//! at commit time to detect conflicting writes.
//!
//! The store also keeps a log of every RPC it served and supports fault
//! injection, so tests can assert on exactly which batched calls were issued.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use stratus_core::{Entity, Error, Key, Result};
use uuid::Uuid;

use crate::query::QueryFilter;

/// RPC kinds served by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Batched get
    Get,
    /// Batched put
    Put,
    /// Batched delete
    Delete,
    /// Id range allocation
    AllocateIds,
    /// Query page fetch
    FetchPage,
    /// Transaction start
    BeginTransaction,
    /// Transaction commit
    Commit,
    /// Transaction rollback
    Rollback,
}

/// One logged RPC
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    /// Batched get of these keys, in request order
    Get {
        /// Requested keys
        keys: Vec<Key>,
    },
    /// Batched put; keys as submitted (`None` for keyless entities)
    Put {
        /// Submitted keys
        keys: Vec<Option<Key>>,
    },
    /// Batched delete
    Delete {
        /// Deleted keys
        keys: Vec<Key>,
    },
    /// Id allocation
    AllocateIds {
        /// Key whose kind and parent scope the range
        key: Key,
        /// Requested count
        size: Option<u64>,
        /// Requested upper bound
        max: Option<u64>,
    },
    /// Query page
    FetchPage {
        /// Kind scanned
        kind: String,
        /// Resume point
        start_after: Option<Key>,
    },
    /// Transaction start
    BeginTransaction {
        /// Application id
        app: String,
    },
    /// Transaction commit attempt
    Commit {
        /// Transaction id
        transaction: Uuid,
        /// Whether the commit was accepted
        committed: bool,
    },
    /// Transaction rollback
    Rollback {
        /// Transaction id
        transaction: Uuid,
    },
}

impl RpcCall {
    /// Method of this call
    pub fn method(&self) -> RpcMethod {
        match self {
            RpcCall::Get { .. } => RpcMethod::Get,
            RpcCall::Put { .. } => RpcMethod::Put,
            RpcCall::Delete { .. } => RpcMethod::Delete,
            RpcCall::AllocateIds { .. } => RpcMethod::AllocateIds,
            RpcCall::FetchPage { .. } => RpcMethod::FetchPage,
            RpcCall::BeginTransaction { .. } => RpcMethod::BeginTransaction,
            RpcCall::Commit { .. } => RpcMethod::Commit,
            RpcCall::Rollback { .. } => RpcMethod::Rollback,
        }
    }
}

/// A buffered or immediate write
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Put(Entity),
    Delete(Key),
}

impl Mutation {
    fn key(&self) -> Option<&Key> {
        match self {
            Mutation::Put(entity) => entity.key(),
            Mutation::Delete(key) => Some(key),
        }
    }
}

/// Per-application shard
#[derive(Debug, Default)]
struct Shard {
    data: FxHashMap<Key, Entity>,
    group_versions: FxHashMap<Key, u64>,
}

#[derive(Debug)]
struct StoreState {
    shards: FxHashMap<String, Shard>,
    next_id: u64,
    calls: Vec<RpcCall>,
    faults: FxHashMap<RpcMethod, VecDeque<Error>>,
    rejected_commits: u32,
    reject_all_commits: bool,
}

/// Shared in-memory store
///
/// Single-threaded: share it with `Rc` between the connections of one test
/// or session.
///
/// # Example
///
/// ```ignore
/// let store = MemoryStore::new();
/// store.seed(entity);
/// let conn = MemoryConnection::new(store.clone());
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    state: RefCell<StoreState>,
    latency: Cell<Option<Duration>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(StoreState {
                shards: FxHashMap::default(),
                next_id: 1,
                calls: Vec::new(),
                faults: FxHashMap::default(),
                rejected_commits: 0,
                reject_all_commits: false,
            }),
            latency: Cell::new(None),
        })
    }

    // ========================================================================
    // Inspection and seeding (not logged)
    // ========================================================================

    /// Store an entity directly, bypassing the RPC log
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntity`] if the entity has no complete key.
    pub fn seed(&self, entity: Entity) -> Result<()> {
        match entity.key() {
            Some(key) if key.is_complete() => {}
            _ => {
                return Err(Error::InvalidEntity(
                    "seeded entities need a complete key".into(),
                ))
            }
        }
        self.apply(vec![Mutation::Put(entity)]);
        Ok(())
    }

    /// Look up an entity without logging an RPC
    pub fn lookup(&self, key: &Key) -> Option<Entity> {
        let state = self.state.borrow();
        state
            .shards
            .get(key.app())
            .and_then(|shard| shard.data.get(key).cloned())
    }

    /// Total number of stored entities
    pub fn len(&self) -> usize {
        self.state
            .borrow()
            .shards
            .values()
            .map(|shard| shard.data.len())
            .sum()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every RPC served so far, in order
    pub fn calls(&self) -> Vec<RpcCall> {
        self.state.borrow().calls.clone()
    }

    /// RPCs of one method, in order
    pub fn calls_of(&self, method: RpcMethod) -> Vec<RpcCall> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.method() == method)
            .cloned()
            .collect()
    }

    /// Number of RPCs of one method
    pub fn call_count(&self, method: RpcMethod) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.method() == method)
            .count()
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Make the next call of `method` fail with `error`
    ///
    /// Faults queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, method: RpcMethod, error: Error) {
        self.state
            .borrow_mut()
            .faults
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Reject the next `count` commits as if they had lost a conflict
    pub fn reject_next_commits(&self, count: u32) {
        self.state.borrow_mut().rejected_commits += count;
    }

    /// Reject every commit from now on
    pub fn reject_all_commits(&self, reject: bool) {
        self.state.borrow_mut().reject_all_commits = reject;
    }

    /// Delay every RPC by `latency` instead of a single scheduler yield
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.latency.set(latency);
    }

    // ========================================================================
    // Operations used by connections
    // ========================================================================

    pub(crate) async fn round_trip(&self) {
        match self.latency.get() {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    pub(crate) fn record(&self, call: RpcCall) {
        self.state.borrow_mut().calls.push(call);
    }

    /// Pop the next injected fault for `method`
    pub(crate) fn check_fault(&self, method: RpcMethod) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match state.faults.get_mut(&method).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Whether the next commit must be rejected regardless of conflicts
    pub(crate) fn take_commit_rejection(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.reject_all_commits {
            return true;
        }
        if state.rejected_commits > 0 {
            state.rejected_commits -= 1;
            return true;
        }
        false
    }

    /// Current version of the entity group rooted at `root`
    pub(crate) fn group_version(&self, root: &Key) -> u64 {
        let state = self.state.borrow();
        state
            .shards
            .get(root.app())
            .and_then(|shard| shard.group_versions.get(root).copied())
            .unwrap_or(0)
    }

    /// Give an incomplete key a fresh id
    pub(crate) fn complete_key(&self, key: &Key) -> Result<Key> {
        if key.is_complete() {
            return Ok(key.clone());
        }
        let (lo, _) = self.allocate(1)?;
        Ok(key.completed_with(lo))
    }

    /// Reserve `count` ids
    pub(crate) fn allocate(&self, count: u64) -> Result<(u64, u64)> {
        let mut state = self.state.borrow_mut();
        let lo = state.next_id;
        let next = lo.checked_add(count).ok_or_else(id_space_exhausted)?;
        state.next_id = next;
        Ok((lo, next - 1))
    }

    /// Reserve every id up to `max`; an empty range when `max` is already taken
    pub(crate) fn allocate_to(&self, max: u64) -> Result<(u64, u64)> {
        let mut state = self.state.borrow_mut();
        let lo = state.next_id;
        if max >= lo {
            state.next_id = max.checked_add(1).ok_or_else(id_space_exhausted)?;
        }
        Ok((lo, max))
    }

    /// Apply writes and bump the version of every touched entity group
    pub(crate) fn apply(&self, mutations: Vec<Mutation>) {
        let mut state = self.state.borrow_mut();
        for mutation in mutations {
            let Some(key) = mutation.key().cloned() else {
                continue;
            };
            let shard = state.shards.entry(key.app().to_string()).or_default();
            *shard.group_versions.entry(key.root()).or_insert(0) += 1;
            match mutation {
                Mutation::Put(entity) => {
                    shard.data.insert(key, entity);
                }
                Mutation::Delete(_) => {
                    shard.data.remove(&key);
                }
            }
        }
    }

    /// Entities matching `filter` after `start_after`, in key order
    ///
    /// Returns at most `limit` entities and whether more follow.
    pub(crate) fn scan(
        &self,
        filter: &QueryFilter,
        start_after: Option<&Key>,
        limit: usize,
    ) -> (Vec<Entity>, bool) {
        let state = self.state.borrow();
        let Some(shard) = state.shards.get(&filter.app) else {
            return (Vec::new(), false);
        };
        let mut matches: Vec<(&Key, &Entity)> = shard
            .data
            .iter()
            .filter(|(key, _)| key.kind() == filter.kind)
            .filter(|(key, _)| {
                filter
                    .ancestor
                    .as_ref()
                    .map_or(true, |ancestor| key.has_ancestor(ancestor))
            })
            .filter(|(key, _)| start_after.map_or(true, |after| *key > after))
            .collect();
        matches.sort_by(|(a, _), (b, _)| a.cmp(b));

        let more = matches.len() > limit;
        let page = matches
            .into_iter()
            .take(limit)
            .map(|(_, entity)| entity.clone())
            .collect();
        (page, more)
    }
}

fn id_space_exhausted() -> Error {
    Error::rpc("allocate_ids", "id space exhausted")
}
