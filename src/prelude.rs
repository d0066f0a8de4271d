//! Convenient imports for Stratus.
//!
//! ```ignore
//! use stratus::prelude::*;
//! ```

// Main entry point
pub use crate::session::{Session, SessionBuilder};

// Error handling
pub use stratus_core::{Error, Result};

// Data model
pub use stratus_core::{ContextConfig, Entity, Key, ReadPolicy, RpcOptions, Value};

// Context
pub use stratus_context::{Context, MapOutput, QueryResults, TransactionOptions};

// Connections and queries
pub use stratus_connection::{Connection, KindQuery, MemoryConnection, MemoryStore, QueryOptions};
