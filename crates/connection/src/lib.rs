//! Connection layer for the stratus client
//!
//! This crate defines the boundary between the client and the remote store:
//! - [`Connection`]: batched get/put/delete, id allocation, paged queries and
//!   transaction begin/commit/rollback
//! - [`Query`], [`QueryBatch`], [`BatchCursor`]: the paging protocol
//! - [`memory`]: an in-memory implementation with RPC logging and fault injection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod memory;
pub mod query;

pub use connection::{Connection, TransactionHandle};
pub use memory::{MemoryConnection, MemoryStore, RpcCall, RpcMethod};
pub use query::{
    BatchCursor, KindQuery, Query, QueryBatch, QueryFilter, QueryOptions, QueryPage,
    DEFAULT_PAGE_SIZE,
};
