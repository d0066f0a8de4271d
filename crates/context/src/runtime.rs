//! Local runtime helpers
//!
//! Contexts spawn their batch and query tasks with `spawn_local`, so they must
//! run inside a [`LocalSet`]. Callers that are not already on one can use
//! [`block_on`] from synchronous code or [`run_local`] from async code.

use std::future::Future;
use stratus_core::{Error, Result};
use tokio::task::LocalSet;

/// Run `future` to completion on a fresh current-thread runtime and
/// `LocalSet`
///
/// # Errors
///
/// Returns [`Error::Internal`] if the runtime cannot be built.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("failed to build runtime: {}", e)))?;
    Ok(LocalSet::new().block_on(&runtime, future))
}

/// Run `future` on a new `LocalSet` inside the current runtime
pub async fn run_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}
