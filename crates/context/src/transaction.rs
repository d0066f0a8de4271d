//! Transactions with bounded commit retry
//!
//! [`Context::transaction`] runs a callback against a child context bound to
//! a fresh transaction:
//!
//! 1. Flush the parent's batchers
//! 2. Begin a transaction and build a child context with a private cache
//! 3. Run the callback, then flush the child's batchers. Requests the
//!    callback issued but never awaited are sent here too
//! 4. Callback error: roll back and return the error unchanged
//! 5. Commit accepted: merge the child cache into the parent and return
//! 6. Commit rejected: start over, at most `1 + retries` attempts in total
//!
//! The callback may run more than once, so it must be safe to repeat.

use crate::context::Context;
use std::future::Future;
use stratus_core::{Entity, Error, Key, Result, Value, DEFAULT_TRANSACTION_RETRIES};

/// Options for [`Context::transaction_with`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Commit retries after the first attempt
    pub retries: u32,
    /// Restrict the transaction to this entity group; its app is used for
    /// the transaction
    pub entity_group: Option<Key>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_TRANSACTION_RETRIES,
            entity_group: None,
        }
    }
}

impl TransactionOptions {
    /// Set the number of retries
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Scope the transaction to the entity group of `key`
    pub fn entity_group(mut self, key: Key) -> Self {
        self.entity_group = Some(key.root());
        self
    }
}

impl Context {
    /// Run `callback` in a transaction with the configured retry count
    pub async fn transaction<F, Fut, T>(&self, callback: F) -> Result<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = TransactionOptions::default().retries(self.config().transaction_retries);
        self.transaction_with(options, callback).await
    }

    /// Run `callback` in a transaction
    ///
    /// The callback receives a child context whose RPCs run inside the
    /// transaction. Its cache starts empty and is merged into this context's
    /// cache only after a successful commit.
    ///
    /// # Errors
    ///
    /// - The callback's error, after rolling back
    /// - [`Error::TransactionFailed`] when every attempt's commit is rejected
    /// - Any error from beginning or committing the transaction
    pub async fn transaction_with<F, Fut, T>(
        &self,
        options: TransactionOptions,
        mut callback: F,
    ) -> Result<T>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config();
        let app = options
            .entity_group
            .as_ref()
            .map_or_else(|| config.default_app.clone(), |key| key.app().to_string());
        let attempts = options.retries.saturating_add(1);

        self.flush().await;

        for attempt in 1..=attempts {
            let handle = self.connection().begin_transaction(&config.rpc, &app).await?;
            let tconn = self
                .connection()
                .transactional(handle.clone(), options.entity_group.clone())?;
            let child = Context::with_policy(tconn.clone(), config.clone(), self.cache_policy());
            tracing::debug!(transaction = %handle, attempt, attempts, "transaction started");

            let outcome = callback(child.clone()).await;
            // Let tasks the callback spawned queue their requests first
            tokio::task::yield_now().await;
            child.flush().await;

            let value = match outcome {
                Ok(value) => value,
                Err(error) => {
                    if let Err(rollback_error) = tconn.rollback(&config.rpc).await {
                        tracing::warn!(
                            transaction = %handle,
                            error = %rollback_error,
                            "rollback failed"
                        );
                    }
                    tracing::debug!(transaction = %handle, error = %error, "transaction rolled back");
                    return Err(error);
                }
            };

            if tconn.commit(&config.rpc).await? {
                let cache = child.take_cache();
                tracing::debug!(transaction = %handle, merged = cache.len(), "transaction committed");
                self.merge_cache(cache);
                return Ok(value);
            }
            tracing::warn!(transaction = %handle, attempt, attempts, "commit rejected, retrying");
        }

        Err(Error::TransactionFailed { attempts })
    }

    /// Fetch the entity `kind`/`name` under `parent`, creating it from
    /// `fields` when it does not exist
    ///
    /// Creation runs in a transaction scoped to the key's entity group, so
    /// concurrent callers agree on a single entity.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKey`] for an empty `name`
    /// - [`Error::InvalidEntity`] when a field uses a reserved name
    pub async fn get_or_insert<I, S>(
        &self,
        kind: &str,
        name: &str,
        parent: Option<&Key>,
        fields: I,
    ) -> Result<Entity>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        if name.is_empty() {
            return Err(Error::InvalidKey("get_or_insert requires a non-empty name".into()));
        }
        let template = Entity::from_fields(kind, fields)?;
        let key = match parent {
            Some(parent) => parent.child_named(kind, name),
            None => Key::named(self.config().default_app.clone(), kind, name),
        };

        if let Some(entity) = self.get(&key).await? {
            return Ok(entity);
        }

        let options = TransactionOptions::default()
            .retries(self.config().transaction_retries)
            .entity_group(key.clone());
        self.transaction_with(options, |ctx| {
            let key = key.clone();
            let mut entity = template.clone();
            async move {
                if let Some(existing) = ctx.get(&key).await? {
                    return Ok(existing);
                }
                entity.set_key(key);
                ctx.put(&mut entity).await?;
                Ok::<_, Error>(entity)
            }
        })
        .await
    }
}
