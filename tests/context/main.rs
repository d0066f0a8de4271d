//! Context Integration Test Suite
//!
//! End-to-end tests of the stratus client against the in-memory store. Every
//! test asserts on the RPC log the store keeps, so batching, caching and
//! transaction behavior is checked at the connection boundary.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all context tests
//! cargo test --test context
//!
//! # Run transaction tests only
//! cargo test --test context transactions::
//! ```

use std::future::Future;
use std::rc::Rc;

use stratus::connection::{MemoryStore, RpcMethod};
use stratus::prelude::*;

// Test modules
pub mod batching;
pub mod caching;
pub mod get_or_insert;
pub mod queries;
pub mod session;
pub mod transactions;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// Application id used by every test
pub const APP: &str = "test";

/// Run an async test body on a fresh local runtime
pub fn run<F: Future>(body: F) -> F::Output {
    stratus::block_on(body).expect("Failed to build test runtime")
}

/// Create a session over a fresh in-memory store
pub fn create_session() -> (Session, Rc<MemoryStore>) {
    let session = Session::builder()
        .app(APP)
        .ephemeral()
        .expect("Failed to create ephemeral session");
    let store = session
        .store()
        .expect("ephemeral session has a store")
        .clone();
    (session, store)
}

/// Key of a root `User` entity
pub fn user_key(name: &str) -> Key {
    Key::named(APP, "User", name)
}

/// A `User` entity with an `age` property
pub fn user(name: &str, age: i64) -> Entity {
    let mut entity = Entity::with_key(user_key(name));
    entity.set("age", age);
    entity
}

/// Number of RPCs of `method` the store has seen
pub fn rpc_count(store: &MemoryStore, method: RpcMethod) -> usize {
    store.call_count(method)
}
