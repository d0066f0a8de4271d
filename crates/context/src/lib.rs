//! Batching, caching and transactional context for the stratus client
//!
//! - [`AutoBatcher`]: coalesces single-item requests into batched RPCs
//! - [`Cache`]: session cache with tombstones
//! - [`Context`]: get/put/delete/allocate_ids, transactions, get_or_insert
//!   and query mapping over a [`Connection`](stratus_connection::Connection)
//! - [`MultiFuture`]: reducer-backed combined result used by query mapping
//!
//! Everything here is single-threaded and must run inside a
//! `tokio::task::LocalSet`; see [`runtime`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batcher;
pub mod cache;
pub mod context;
pub mod multi;
pub mod query;
pub mod runtime;
pub mod transaction;

pub use batcher::{AutoBatcher, BatchMethod, BatchReply, BatcherStats};
pub use cache::{Cache, Lookup};
pub use context::{CachePolicy, Context};
pub use multi::{MultiFuture, QueryResults, QueryStats};
pub use query::MapOutput;
pub use runtime::{block_on, run_local};
pub use transaction::TransactionOptions;
