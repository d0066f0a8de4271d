//! Batching Tests
//!
//! Requests issued in the same turn share one RPC and results reach the right
//! callers.

use crate::*;
use std::time::Duration;
use stratus::connection::RpcCall;

// =============================================================================
// COALESCING
// =============================================================================

#[test]
fn test_same_turn_gets_issue_one_rpc() {
    run(async {
        let (session, store) = create_session();
        store.seed(user("a", 1)).unwrap();
        store.seed(user("c", 3)).unwrap();

        let (ka, kb, kc) = (user_key("a"), user_key("b"), user_key("c"));

        let (a, b, c) = futures::join!(session.get(&ka), session.get(&kb), session.get(&kc));

        assert_eq!(a.unwrap(), Some(user("a", 1)));
        assert_eq!(b.unwrap(), None);
        assert_eq!(c.unwrap(), Some(user("c", 3)));
        assert_eq!(
            store.calls(),
            vec![RpcCall::Get {
                keys: vec![user_key("a"), user_key("b"), user_key("c")]
            }]
        );
    });
}

#[test]
fn test_same_turn_puts_issue_one_rpc() {
    run(async {
        let (session, store) = create_session();
        let mut a = user("a", 1);
        let mut b = Entity::new("User");

        let (ka, kb) = futures::join!(session.put(&mut a), session.put(&mut b));

        assert_eq!(ka.unwrap(), user_key("a"));
        let kb = kb.unwrap();
        assert!(kb.is_complete());
        assert_eq!(kb.app(), APP);
        assert_eq!(b.key(), Some(&kb));
        assert_eq!(rpc_count(&store, RpcMethod::Put), 1);
        assert_eq!(store.len(), 2);
    });
}

#[test]
fn test_slow_store_still_batches_same_turn_requests() {
    run(async {
        let (session, store) = create_session();
        store.set_latency(Some(Duration::from_millis(10)));
        store.seed(user("a", 1)).unwrap();
        let (ka, kb) = (user_key("a"), user_key("b"));

        let (a, b) = futures::join!(session.get(&ka), session.get(&kb));
        assert_eq!(a.unwrap(), Some(user("a", 1)));
        assert_eq!(b.unwrap(), None);

        // Both queued before close, sent as one batch
        let first = session.delete(&ka);
        let second = session.delete(&kb);
        session.close().await;
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
        assert_eq!(rpc_count(&store, RpcMethod::Delete), 1);
        assert!(store.is_empty());
    });
}

#[test]
fn test_sequential_calls_issue_separate_rpcs() {
    run(async {
        let (session, store) = create_session();

        session.get(&user_key("a")).await.unwrap();
        session.get(&user_key("b")).await.unwrap();

        assert_eq!(rpc_count(&store, RpcMethod::Get), 2);
    });
}

#[test]
fn test_kinds_batch_independently() {
    run(async {
        let (session, store) = create_session();
        let mut a = user("a", 1);
        let x = user_key("x");
        let y = user_key("y");

        let (got, put, deleted) =
            futures::join!(session.get(&x), session.put(&mut a), session.delete(&y));
        got.unwrap();
        put.unwrap();
        deleted.unwrap();

        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
        assert_eq!(rpc_count(&store, RpcMethod::Put), 1);
        assert_eq!(rpc_count(&store, RpcMethod::Delete), 1);
    });
}

// =============================================================================
// FAILURES AND FLUSHING
// =============================================================================

#[test]
fn test_batch_failure_reaches_every_caller() {
    run(async {
        let (session, store) = create_session();
        store.fail_next(RpcMethod::Put, Error::rpc("put", "deadline exceeded"));
        let mut a = user("a", 1);
        let mut b = user("b", 2);

        let (ra, rb) = futures::join!(session.put(&mut a), session.put(&mut b));

        assert_eq!(ra, Err(Error::rpc("put", "deadline exceeded")));
        assert_eq!(rb, Err(Error::rpc("put", "deadline exceeded")));
        assert!(store.is_empty());
        assert_eq!(session.cache_len(), 0);
    });
}

#[test]
fn test_close_drains_queued_work() {
    run(async {
        let (session, store) = create_session();
        let mut a = user("a", 1);
        // Queued without being polled
        let put = session.put(&mut a);

        session.close().await;

        assert_eq!(store.lookup(&user_key("a")), Some(user("a", 1)));
        assert_eq!(put.await.unwrap(), user_key("a"));
        assert_eq!(session.metrics().batches, 1);
    });
}
