//! Session Tests
//!
//! Builder configuration, config files and metrics.

use crate::*;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_builder_overrides_defaults() {
    let config = Session::builder()
        .app("guestbook")
        .transaction_retries(7)
        .deadline(Duration::from_millis(1500))
        .read_policy(ReadPolicy::Eventual)
        .build_config()
        .unwrap();

    assert_eq!(config.default_app, "guestbook");
    assert_eq!(config.transaction_retries, 7);
    assert_eq!(config.rpc.deadline_ms, Some(1500));
    assert_eq!(config.rpc.read_policy, ReadPolicy::Eventual);
}

#[test]
fn test_config_file_with_builder_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
default_app = "from-file"
transaction_retries = 1

[rpc]
deadline_ms = 200
"#
    )
    .unwrap();

    let config = Session::builder()
        .config_file(file.path())
        .transaction_retries(4)
        .build_config()
        .unwrap();

    assert_eq!(config.default_app, "from-file");
    assert_eq!(config.transaction_retries, 4);
    assert_eq!(config.rpc.deadline_ms, Some(200));
}

#[test]
fn test_oversized_deadline_is_rejected() {
    let result = Session::builder().deadline(Duration::MAX).build_config();
    assert!(matches!(result, Err(Error::Config(_))));

    let config = Session::builder()
        .deadline(Duration::from_secs(30))
        .build_config()
        .unwrap();
    assert_eq!(config.rpc.deadline_ms, Some(30_000));
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = Session::builder().app("").ephemeral();
    assert!(matches!(result, Err(Error::Config(_))));

    let result = Session::builder()
        .config_file("/nonexistent/stratus.toml")
        .ephemeral();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_ephemeral_session_exposes_store() {
    let session = Session::ephemeral().unwrap();
    assert!(session.is_ephemeral());
    assert!(session.store().is_some());
    assert_eq!(session.config().default_app, ContextConfig::default().default_app);
}

#[test]
fn test_connect_uses_given_connection() {
    let store = MemoryStore::new();
    let session = Session::connect(MemoryConnection::new(store)).unwrap();
    assert!(!session.is_ephemeral());
    assert!(!session.in_transaction());
}

#[test]
fn test_metrics_report_batching() {
    run(async {
        let (session, _) = create_session();

        let (ka, kb, kc) = (user_key("a"), user_key("b"), user_key("c"));

        let (a, b, c) = futures::join!(session.get(&ka), session.get(&kb), session.get(&kc));
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let metrics = session.metrics();
        assert_eq!(metrics.batches, 1);
        assert_eq!(metrics.batched_items, 3);
        assert_eq!(metrics.cached, 3);
        assert_eq!(metrics.batching_ratio(), 3.0);
    });
}

#[test]
fn test_allocate_ids_through_session() {
    run(async {
        let (session, store) = create_session();

        let (lo, hi) = session
            .allocate_ids(&Key::incomplete(APP, "User"), None, Some(50))
            .await
            .unwrap();

        assert_eq!((lo, hi), (1, 50));
        assert_eq!(rpc_count(&store, RpcMethod::AllocateIds), 1);
    });
}
