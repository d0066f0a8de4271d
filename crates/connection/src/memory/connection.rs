//! Connection over a [`MemoryStore`]
//!
//! A non-transactional [`MemoryConnection`] applies writes immediately. A
//! transactional one (from [`Connection::transactional`]) buffers writes and
//! applies them on commit, under optimistic concurrency control:
//!
//! - Every entity group the transaction reads or writes has its version
//!   recorded the first time it is touched
//! - At commit, if any recorded group version changed, the commit is rejected
//!   (`Ok(false)`) and nothing is applied
//! - Otherwise all buffered writes are applied at once
//!
//! Reads inside a transaction see committed data only, not the transaction's
//! own buffered writes.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use stratus_core::{Entity, Error, Key, Result, RpcOptions};

use super::store::{MemoryStore, Mutation, RpcCall, RpcMethod};
use crate::connection::{Connection, TransactionHandle};
use crate::query::{QueryFilter, QueryOptions, QueryPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Committed,
    Aborted,
    RolledBack,
}

#[derive(Debug)]
struct TxnState {
    handle: TransactionHandle,
    entity_group: Option<Key>,
    status: TxnStatus,
    observed: FxHashMap<Key, u64>,
    writes: Vec<Mutation>,
}

/// [`Connection`] backed by a shared [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryConnection {
    store: Rc<MemoryStore>,
    txn: Option<RefCell<TxnState>>,
}

impl MemoryConnection {
    /// Non-transactional connection to `store`
    pub fn new(store: Rc<MemoryStore>) -> Rc<Self> {
        Rc::new(Self { store, txn: None })
    }

    /// The store behind this connection
    pub fn store(&self) -> &Rc<MemoryStore> {
        &self.store
    }

    /// Check a key against the transaction's entity group and record the
    /// group version on first touch. No-op outside a transaction.
    fn observe(&self, key: &Key) -> Result<()> {
        let Some(txn) = &self.txn else {
            return Ok(());
        };
        let mut txn = txn.borrow_mut();
        if txn.status != TxnStatus::Active {
            return Err(Error::TransactionNotActive(txn.handle.to_string()));
        }
        let root = key.root();
        if let Some(group) = &txn.entity_group {
            if &root != group {
                return Err(Error::InvalidKey(format!(
                    "key {} is outside entity group {}",
                    key, group
                )));
            }
        }
        if !txn.observed.contains_key(&root) {
            let version = self.store.group_version(&root);
            txn.observed.insert(root, version);
        }
        Ok(())
    }

    /// Apply now, or buffer until commit inside a transaction
    fn write(&self, mutations: Vec<Mutation>) {
        match &self.txn {
            Some(txn) => txn.borrow_mut().writes.extend(mutations),
            None => self.store.apply(mutations),
        }
    }

    fn require_txn(&self, method: &str) -> Result<&RefCell<TxnState>> {
        self.txn.as_ref().ok_or_else(|| {
            Error::TransactionNotActive(format!("{} on a non-transactional connection", method))
        })
    }
}

#[async_trait(?Send)]
impl Connection for MemoryConnection {
    async fn get(&self, _options: &RpcOptions, keys: Vec<Key>) -> Result<Vec<Option<Entity>>> {
        self.store.record(RpcCall::Get { keys: keys.clone() });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::Get)?;

        let mut results = Vec::with_capacity(keys.len());
        for key in &keys {
            self.observe(key)?;
            results.push(self.store.lookup(key));
        }
        Ok(results)
    }

    async fn put(&self, _options: &RpcOptions, entities: Vec<Entity>) -> Result<Vec<Key>> {
        self.store.record(RpcCall::Put {
            keys: entities.iter().map(|e| e.key().cloned()).collect(),
        });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::Put)?;

        let mut keys = Vec::with_capacity(entities.len());
        let mut mutations = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key = entity.key().cloned().ok_or_else(|| {
                Error::InvalidEntity(format!("{} entity has no key", entity.kind()))
            })?;
            self.observe(&key)?;
            let key = self.store.complete_key(&key)?;
            entity.set_key(key.clone());
            keys.push(key);
            mutations.push(Mutation::Put(entity));
        }
        self.write(mutations);
        Ok(keys)
    }

    async fn delete(&self, _options: &RpcOptions, keys: Vec<Key>) -> Result<()> {
        self.store.record(RpcCall::Delete { keys: keys.clone() });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::Delete)?;

        for key in &keys {
            self.observe(key)?;
        }
        self.write(keys.into_iter().map(Mutation::Delete).collect());
        Ok(())
    }

    async fn allocate_ids(
        &self,
        _options: &RpcOptions,
        key: &Key,
        size: Option<u64>,
        max: Option<u64>,
    ) -> Result<(u64, u64)> {
        self.store.record(RpcCall::AllocateIds {
            key: key.clone(),
            size,
            max,
        });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::AllocateIds)?;

        match (size, max) {
            (Some(0), None) => Err(Error::rpc("allocate_ids", "size must be greater than 0")),
            (Some(size), None) => self.store.allocate(size),
            (None, Some(max)) => self.store.allocate_to(max),
            _ => Err(Error::rpc(
                "allocate_ids",
                "exactly one of size or max must be given",
            )),
        }
    }

    async fn fetch_page(
        &self,
        options: &QueryOptions,
        filter: &QueryFilter,
        start_after: Option<Key>,
    ) -> Result<QueryPage> {
        self.store.record(RpcCall::FetchPage {
            kind: filter.kind.clone(),
            start_after: start_after.clone(),
        });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::FetchPage)?;

        if options.page_size == 0 {
            return Err(Error::rpc("fetch_page", "page_size must be greater than 0"));
        }
        if let Some(ancestor) = &filter.ancestor {
            self.observe(ancestor)?;
        }
        let (entities, more) = self
            .store
            .scan(filter, start_after.as_ref(), options.page_size);
        Ok(QueryPage { entities, more })
    }

    async fn begin_transaction(&self, _options: &RpcOptions, app: &str) -> Result<TransactionHandle> {
        self.store.record(RpcCall::BeginTransaction {
            app: app.to_string(),
        });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::BeginTransaction)?;

        if self.txn.is_some() {
            return Err(Error::rpc(
                "begin_transaction",
                "nested transactions are not supported",
            ));
        }
        Ok(TransactionHandle::new(app))
    }

    fn transactional(
        &self,
        transaction: TransactionHandle,
        entity_group: Option<Key>,
    ) -> Result<Rc<dyn Connection>> {
        if self.txn.is_some() {
            return Err(Error::rpc(
                "transactional",
                "connection is already transactional",
            ));
        }
        let state = TxnState {
            handle: transaction,
            entity_group: entity_group.map(|key| key.root()),
            status: TxnStatus::Active,
            observed: FxHashMap::default(),
            writes: Vec::new(),
        };
        Ok(Rc::new(MemoryConnection {
            store: self.store.clone(),
            txn: Some(RefCell::new(state)),
        }))
    }

    async fn commit(&self, _options: &RpcOptions) -> Result<bool> {
        let txn = self.require_txn("commit")?;
        let transaction = txn.borrow().handle.id();
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::Commit)?;

        let mut state = txn.borrow_mut();
        if state.status != TxnStatus::Active {
            return Err(Error::TransactionNotActive(state.handle.to_string()));
        }
        let conflicted = state
            .observed
            .iter()
            .any(|(root, version)| self.store.group_version(root) != *version);
        let committed = !(self.store.take_commit_rejection() || conflicted);

        if committed {
            self.store.apply(std::mem::take(&mut state.writes));
            state.status = TxnStatus::Committed;
        } else {
            state.writes.clear();
            state.status = TxnStatus::Aborted;
            tracing::debug!(transaction = %state.handle, conflicted, "commit rejected");
        }
        self.store.record(RpcCall::Commit {
            transaction,
            committed,
        });
        Ok(committed)
    }

    async fn rollback(&self, _options: &RpcOptions) -> Result<()> {
        let txn = self.require_txn("rollback")?;
        let transaction = txn.borrow().handle.id();
        self.store.record(RpcCall::Rollback { transaction });
        self.store.round_trip().await;
        self.store.check_fault(RpcMethod::Rollback)?;

        let mut state = txn.borrow_mut();
        if state.status != TxnStatus::Active {
            return Err(Error::TransactionNotActive(state.handle.to_string()));
        }
        state.writes.clear();
        state.status = TxnStatus::RolledBack;
        Ok(())
    }

    fn transaction(&self) -> Option<TransactionHandle> {
        self.txn.as_ref().map(|txn| txn.borrow().handle.clone())
    }
}
