//! Caching Tests
//!
//! Reads after writes and deletes are answered from the session cache.

use crate::*;
use stratus::context::Lookup;

#[test]
fn test_get_after_put_needs_no_rpc() {
    run(async {
        let (session, store) = create_session();
        let mut alice = user("alice", 30);

        let key = session.put(&mut alice).await.unwrap();
        assert_eq!(session.get(&key).await.unwrap(), Some(alice));
        assert_eq!(rpc_count(&store, RpcMethod::Get), 0);
    });
}

#[test]
fn test_get_after_delete_needs_no_rpc() {
    run(async {
        let (session, store) = create_session();
        let mut alice = user("alice", 30);
        let key = session.put(&mut alice).await.unwrap();

        session.delete(&key).await.unwrap();

        assert_eq!(session.cached(&key), Lookup::Absent);
        assert_eq!(session.get(&key).await.unwrap(), None);
        assert_eq!(rpc_count(&store, RpcMethod::Get), 0);
        assert!(store.lookup(&key).is_none());
    });
}

#[test]
fn test_delete_of_uncached_key_leaves_cache_alone() {
    run(async {
        let (session, store) = create_session();
        store.seed(user("bob", 40)).unwrap();

        session.delete(&user_key("bob")).await.unwrap();

        assert_eq!(session.cached(&user_key("bob")), Lookup::Unknown);
        assert_eq!(session.get(&user_key("bob")).await.unwrap(), None);
        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}

#[test]
fn test_missing_entity_is_remembered() {
    run(async {
        let (session, store) = create_session();

        assert_eq!(session.get(&user_key("ghost")).await.unwrap(), None);
        assert_eq!(session.get(&user_key("ghost")).await.unwrap(), None);

        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}

#[test]
fn test_cache_policy_can_exclude_kinds() {
    run(async {
        let (session, store) = create_session();
        session.set_cache_policy(|key, _| key.kind() != "Counter");

        let mut counter = Entity::with_key(Key::named(APP, "Counter", "hits"));
        counter.set("n", 1);
        let key = session.put(&mut counter).await.unwrap();

        assert_eq!(session.cached(&key), Lookup::Unknown);
        session.get(&key).await.unwrap();
        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}

#[test]
fn test_clear_cache_forces_rpc() {
    run(async {
        let (session, store) = create_session();
        let mut alice = user("alice", 30);
        let key = session.put(&mut alice).await.unwrap();

        session.clear_cache();
        assert_eq!(session.cache_len(), 0);
        assert_eq!(session.get(&key).await.unwrap(), Some(alice));
        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}
