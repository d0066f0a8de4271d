//! Transaction Tests
//!
//! Atomicity on failure, cache merge on commit and bounded retry on commit
//! rejection.

use crate::*;
use std::cell::Cell;
use stratus::context::Lookup;

fn account_key(name: &str) -> Key {
    Key::named(APP, "Account", name)
}

fn account(name: &str, balance: i64) -> Entity {
    let mut entity = Entity::with_key(account_key(name));
    entity.set("balance", balance);
    entity
}

fn balance(entity: &Entity) -> i64 {
    entity.get("balance").and_then(Value::as_int).unwrap_or(0)
}

// =============================================================================
// COMMIT
// =============================================================================

#[test]
fn test_transfer_commits_atomically() {
    run(async {
        let (session, store) = create_session();
        store.seed(account("a", 100)).unwrap();
        store.seed(account("b", 0)).unwrap();

        session
            .transaction(|tx| async move {
                let (ka, kb) = (account_key("a"), account_key("b"));
                let (a, b) = futures::join!(tx.get(&ka), tx.get(&kb));
                let mut a = a?.ok_or_else(|| Error::Internal("account a is missing".into()))?;
                let mut b = b?.ok_or_else(|| Error::Internal("account b is missing".into()))?;
                a.set("balance", balance(&a) - 30);
                b.set("balance", balance(&b) + 30);
                let (ra, rb) = futures::join!(tx.put(&mut a), tx.put(&mut b));
                ra?;
                rb?;
                Ok::<_, Error>(())
            })
            .await
            .unwrap();

        assert_eq!(store.lookup(&account_key("a")), Some(account("a", 70)));
        assert_eq!(store.lookup(&account_key("b")), Some(account("b", 30)));
        // The child's cache was merged into the session
        assert_eq!(session.cached(&account_key("a")), Lookup::Present(account("a", 70)));
        assert_eq!(session.get(&account_key("b")).await.unwrap(), Some(account("b", 30)));
        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}

#[test]
fn test_writes_inside_transaction_are_batched() {
    run(async {
        let (session, store) = create_session();

        session
            .transaction(|tx| async move {
                let mut a = account("a", 1);
                let mut b = account("b", 2);
                let (ra, rb) = futures::join!(tx.put(&mut a), tx.put(&mut b));
                ra?;
                rb?;
                Ok::<_, Error>(())
            })
            .await
            .unwrap();

        assert_eq!(rpc_count(&store, RpcMethod::Put), 1);
        assert_eq!(store.len(), 2);
    });
}

#[test]
fn test_unawaited_deletes_land_in_the_commit() {
    run(async {
        let (session, store) = create_session();
        store.seed(account("a", 1)).unwrap();
        store.seed(account("b", 2)).unwrap();

        session
            .transaction(|tx| async move {
                drop(tx.delete(&account_key("a")));
                let spawned = tx.clone();
                tokio::task::spawn_local(async move { spawned.delete(&account_key("b")).await });
                Ok::<_, Error>(())
            })
            .await
            .unwrap();

        assert!(store.is_empty());
        let methods: Vec<_> = store.calls().iter().map(|call| call.method()).collect();
        assert_eq!(methods.last(), Some(&RpcMethod::Commit));
        assert!(rpc_count(&store, RpcMethod::Delete) >= 1);
    });
}

// =============================================================================
// FAILURE
// =============================================================================

#[test]
fn test_callback_failure_leaves_no_trace() {
    run(async {
        let (session, store) = create_session();

        let result: Result<()> = session
            .transaction(|tx| async move {
                tx.put(&mut account("a", 1)).await?;
                Err(Error::InvalidEntity("overdrawn".into()))
            })
            .await;

        assert_eq!(result, Err(Error::InvalidEntity("overdrawn".into())));
        assert!(store.is_empty());
        assert_eq!(session.cached(&account_key("a")), Lookup::Unknown);
        assert_eq!(rpc_count(&store, RpcMethod::Rollback), 1);
        assert_eq!(rpc_count(&store, RpcMethod::BeginTransaction), 1);
    });
}

#[test]
fn test_failing_callback_flushes_pending_writes_before_rollback() {
    run(async {
        let (session, store) = create_session();

        let result: Result<()> = session
            .transaction(|tx| async move {
                // Issued, never awaited
                drop(tx.put(&mut account("a", 1)));
                drop(tx.delete(&account_key("b")));
                Err(Error::InvalidEntity("overdrawn".into()))
            })
            .await;

        assert_eq!(result, Err(Error::InvalidEntity("overdrawn".into())));
        let methods: Vec<_> = store.calls().iter().map(|call| call.method()).collect();
        assert_eq!(methods.first(), Some(&RpcMethod::BeginTransaction));
        assert_eq!(methods.last(), Some(&RpcMethod::Rollback));
        assert_eq!(rpc_count(&store, RpcMethod::Put), 1);
        assert_eq!(rpc_count(&store, RpcMethod::Delete), 1);
        assert!(store.is_empty());
    });
}

#[test]
fn test_rollback_failure_keeps_original_error() {
    run(async {
        let (session, store) = create_session();
        store.fail_next(RpcMethod::Rollback, Error::rpc("rollback", "unavailable"));

        let result: Result<()> = session
            .transaction(|_| async { Err(Error::Internal("callback".into())) })
            .await;

        assert_eq!(result, Err(Error::Internal("callback".into())));
    });
}

// =============================================================================
// RETRY
// =============================================================================

#[test]
fn test_retry_bound_with_always_rejecting_commit() {
    run(async {
        let (session, store) = create_session();
        store.reject_all_commits(true);
        let runs = Rc::new(Cell::new(0u32));

        let counter = runs.clone();
        let result = session
            .transaction_with(TransactionOptions::default().retries(3), move |tx| {
                counter.set(counter.get() + 1);
                async move { tx.put(&mut account("a", 1)).await }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err, Error::TransactionFailed { attempts: 4 });
        assert!(err.to_string().contains("could not be committed"));
        assert_eq!(runs.get(), 4);
        assert_eq!(rpc_count(&store, RpcMethod::BeginTransaction), 4);
        assert!(store.is_empty());
        assert_eq!(session.cache_len(), 0);
    });
}

#[test]
fn test_conflicting_write_is_retried_and_succeeds() {
    run(async {
        let (session, store) = create_session();
        store.seed(account("a", 100)).unwrap();
        let outsider = stratus::connection::MemoryConnection::new(store.clone());
        let attempts = Rc::new(Cell::new(0u32));

        let seen = attempts.clone();
        session
            .transaction(move |tx| {
                seen.set(seen.get() + 1);
                let first = seen.get() == 1;
                let outsider = outsider.clone();
                async move {
                    let mut a = tx
                        .get(&account_key("a"))
                        .await?
                        .ok_or_else(|| Error::Internal("account a is missing".into()))?;
                    if first {
                        // A concurrent writer touches the same entity group
                        outsider
                            .put(&RpcOptions::default(), vec![account("a", 500)])
                            .await?;
                    }
                    a.set("balance", balance(&a) + 1);
                    tx.put(&mut a).await?;
                    Ok::<_, Error>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(store.lookup(&account_key("a")), Some(account("a", 501)));
    });
}

#[test]
fn test_configured_retry_count_is_used() {
    run(async {
        let session = Session::builder()
            .app(APP)
            .transaction_retries(1)
            .ephemeral()
            .unwrap();
        let store = session.store().unwrap().clone();
        store.reject_all_commits(true);

        let result = session.transaction(|_| async { Ok::<_, Error>(()) }).await;

        assert_eq!(result, Err(Error::TransactionFailed { attempts: 2 }));
        assert_eq!(rpc_count(&store, RpcMethod::BeginTransaction), 2);
    });
}
