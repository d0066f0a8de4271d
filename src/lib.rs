//! # Stratus
//!
//! Batched, cached, transactional client for remote keyed entity stores.
//!
//! Stratus sits between application code and a store reached over RPC. It
//! turns many single-entity calls into a few batched RPCs, remembers what the
//! session has read and written, and runs transactions with bounded retry.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratus::prelude::*;
//!
//! stratus::block_on(async {
//!     let session = Session::ephemeral()?;
//!
//!     let mut user = Entity::with_key(Key::named("default", "User", "alice"));
//!     user.set("age", 30);
//!     session.put(&mut user).await?;
//!
//!     // Issued in the same turn: one batched get RPC
//!     let (a, b) = futures::join!(
//!         session.get(&Key::named("default", "User", "alice")),
//!         session.get(&Key::named("default", "User", "bob")),
//!     );
//!     Ok::<_, Error>(())
//! })??;
//! ```
//!
//! ## Crates
//!
//! - [`stratus_core`]: keys, entities, values, errors and configuration
//! - [`stratus_connection`]: the RPC boundary and an in-memory store
//! - [`stratus_context`]: batching, caching, transactions and query mapping

#![warn(missing_docs)]

mod logging;
mod session;

pub mod prelude;

// Re-export main entry points
pub use logging::init_logging;
pub use session::{Session, SessionBuilder, SessionMetrics};

// Re-export the layers
pub use stratus_connection as connection;
pub use stratus_context as context;

pub use stratus_context::{block_on, run_local, Context, TransactionOptions};
pub use stratus_core::{ContextConfig, Entity, Error, Key, Result, Value};
