//! In-memory backend
//!
//! [`MemoryStore`] holds the data; [`MemoryConnection`] serves the
//! [`Connection`](crate::Connection) RPCs over it, including optimistic
//! transactions. Used by tests and for running the client without a remote
//! store.

mod connection;
mod store;

pub use connection::MemoryConnection;
pub use store::{MemoryStore, RpcCall, RpcMethod};
