//! Core types for the stratus client
//!
//! This crate defines the data model shared by every other crate:
//! - [`Key`]: entity identity, including the entity group used to scope transactions
//! - [`Entity`] and [`Value`]: the records the client caches and moves over RPCs
//! - [`Error`] and [`Result`]: the error taxonomy of the client
//! - [`ContextConfig`] and [`RpcOptions`]: explicit configuration, loadable from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod value;

pub use config::{
    ContextConfig, LoggingConfig, ReadPolicy, RpcOptions, DEFAULT_APP, DEFAULT_TRANSACTION_RETRIES,
};
pub use entity::{Entity, RESERVED_PROPERTIES};
pub use error::{Error, Result};
pub use key::{Key, KeyId, PathElement};
pub use value::Value;
