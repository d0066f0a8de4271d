//! Query Mapping Tests
//!
//! Results are reconciled against the session cache before the callback sees
//! them.

use crate::*;

fn seed_users(store: &MemoryStore, names: &[&str]) {
    for (age, name) in names.iter().enumerate() {
        store.seed(user(name, age as i64)).unwrap();
    }
}

fn age(entity: &Entity) -> i64 {
    entity.get("age").and_then(Value::as_int).unwrap_or(-1)
}

#[test]
fn test_deleted_entity_is_skipped_and_not_counted() {
    run(async {
        let (session, store) = create_session();
        seed_users(&store, &["a", "b", "c"]);

        // Deleted in this session, then recreated behind its back
        session.get(&user_key("b")).await.unwrap();
        session.delete(&user_key("b")).await.unwrap();
        store.seed(user("b", 1)).unwrap();

        let (results, driver) = session.map_query_collect(
            KindQuery::new(APP, "User"),
            |e| MapOutput::Value(e.key().cloned()),
            QueryOptions::default(),
        );

        assert_eq!(driver.await.unwrap().unwrap(), 2);
        let stats = results.stats();
        let keys = results.await.unwrap();
        assert_eq!(keys, vec![Some(user_key("a")), Some(user_key("c"))]);
        assert_eq!(stats.deleted_conflicts, 1);
        assert_eq!(stats.delivered, 2);
    });
}

#[test]
fn test_locally_modified_entity_is_substituted() {
    run(async {
        let (session, store) = create_session();
        seed_users(&store, &["a", "b"]);

        // Written through the session, then overwritten behind its back
        let mut a = user("a", 99);
        session.put(&mut a).await.unwrap();
        store.seed(user("a", 5)).unwrap();

        let (results, driver) = session.map_query(
            KindQuery::new(APP, "User"),
            |e| MapOutput::Value(age(&e)),
            QueryOptions::default(),
            |sum, age| sum + age,
            0i64,
        );

        assert_eq!(driver.await.unwrap().unwrap(), 2);
        let stats = results.stats();
        // a is delivered as cached (99), b from the query (1)
        assert_eq!(results.await.unwrap(), 100);
        assert_eq!(stats.modified_conflicts, 1);
    });
}

#[test]
fn test_query_results_populate_cache() {
    run(async {
        let (session, store) = create_session();
        seed_users(&store, &["a", "b", "c", "d"]);

        let (results, driver) = session.map_query_collect(
            KindQuery::new(APP, "User"),
            |e| MapOutput::Value(age(&e)),
            QueryOptions::with_page_size(3),
        );
        driver.await.unwrap().unwrap();
        assert_eq!(results.await.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(rpc_count(&store, RpcMethod::FetchPage), 2);

        for name in ["a", "b", "c", "d"] {
            session.get(&user_key(name)).await.unwrap();
        }
        assert_eq!(rpc_count(&store, RpcMethod::Get), 0);
    });
}

#[test]
fn test_callbacks_fan_out_concurrently() {
    run(async {
        let (session, store) = create_session();
        seed_users(&store, &["a", "b", "c"]);
        let ctx = session.context().clone();

        // Each callback looks up a related entity; the lookups share one RPC
        let (results, driver) = session.map_query_collect(
            KindQuery::new(APP, "User"),
            move |e| {
                let ctx = ctx.clone();
                let profile = Key::named(APP, "Profile", age(&e).to_string());
                MapOutput::pending(async move { Ok::<_, Error>(ctx.get(&profile).await?.is_none()) })
            },
            QueryOptions::default(),
        );

        assert_eq!(driver.await.unwrap().unwrap(), 3);
        assert_eq!(results.await.unwrap(), vec![true, true, true]);
        assert_eq!(rpc_count(&store, RpcMethod::Get), 1);
    });
}

#[test]
fn test_paging_failure_fails_results() {
    run(async {
        let (session, store) = create_session();
        seed_users(&store, &["a", "b", "c"]);
        store.fail_next(RpcMethod::FetchPage, Error::rpc("fetch_page", "unavailable"));

        let (results, driver) = session.map_query_collect(
            KindQuery::new(APP, "User"),
            |e| MapOutput::Value(age(&e)),
            QueryOptions::default(),
        );

        assert!(driver.await.unwrap().is_err());
        assert_eq!(results.await, Err(Error::rpc("fetch_page", "unavailable")));
    });
}
