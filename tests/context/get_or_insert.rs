//! get_or_insert Tests

use crate::*;

#[test]
fn test_creates_missing_entity() {
    run(async {
        let (session, store) = create_session();

        let entity = session
            .get_or_insert("User", "alice", None, [("age", Value::from(30))])
            .await
            .unwrap();

        assert_eq!(entity, user("alice", 30));
        assert_eq!(store.lookup(&user_key("alice")), Some(user("alice", 30)));
        assert_eq!(rpc_count(&store, RpcMethod::BeginTransaction), 1);
        assert_eq!(rpc_count(&store, RpcMethod::Put), 1);
    });
}

#[test]
fn test_existing_entity_is_returned_unchanged() {
    run(async {
        let (session, store) = create_session();
        store.seed(user("alice", 30)).unwrap();

        let entity = session
            .get_or_insert("User", "alice", None, [("age", Value::from(99))])
            .await
            .unwrap();

        assert_eq!(entity, user("alice", 30));
        assert_eq!(rpc_count(&store, RpcMethod::BeginTransaction), 0);
        assert_eq!(rpc_count(&store, RpcMethod::Put), 0);
    });
}

#[test]
fn test_concurrent_callers_agree_on_one_entity() {
    run(async {
        let (session, store) = create_session();

        let (first, second) = futures::join!(
            session.get_or_insert("User", "alice", None, [("age", Value::from(1))]),
            session.get_or_insert("User", "alice", None, [("age", Value::from(2))]),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&user_key("alice")), Some(first));
    });
}

#[test]
fn test_child_of_parent_uses_parent_app() {
    run(async {
        let (session, store) = create_session();
        let parent = Key::named("billing", "Account", "acme");

        let invoice = session
            .get_or_insert("Invoice", "2024-01", Some(&parent), Vec::<(String, Value)>::new())
            .await
            .unwrap();

        let key = parent.child_named("Invoice", "2024-01");
        assert_eq!(invoice.key(), Some(&key));
        assert_eq!(key.app(), "billing");
        assert!(store.lookup(&key).is_some());
    });
}

#[test]
fn test_invalid_input_is_rejected_before_any_rpc() {
    run(async {
        let (session, store) = create_session();

        let empty = session
            .get_or_insert("User", "", None, Vec::<(String, Value)>::new())
            .await;
        assert!(matches!(empty, Err(Error::InvalidKey(_))));

        let reserved = session
            .get_or_insert("User", "alice", None, [("key", Value::from("x"))])
            .await;
        assert!(matches!(reserved, Err(Error::InvalidEntity(_))));

        assert!(store.calls().is_empty());
    });
}
