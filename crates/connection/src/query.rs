//! Paged query execution
//!
//! A [`Query`] is run against a connection and yields a [`QueryBatch`]. A batch
//! carries its results and, when more results exist, a [`BatchCursor`] that
//! fetches the following batch. Consumers loop until a batch has no cursor:
//!
//! ```ignore
//! let mut batch = query.run(conn, &options).await?;
//! loop {
//!     let (results, next) = batch.into_parts();
//!     consume(results);
//!     match next {
//!         Some(cursor) => batch = cursor.next(&options).await?,
//!         None => break,
//!     }
//! }
//! ```

use crate::connection::Connection;
use async_trait::async_trait;
use std::rc::Rc;
use stratus_core::{Entity, Error, Key, Result, RpcOptions};

/// Default number of results per page
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Options for running a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Maximum results per batch
    pub page_size: usize,
    /// Options forwarded to every page RPC
    pub rpc: RpcOptions,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            rpc: RpcOptions::default(),
        }
    }
}

impl QueryOptions {
    /// Options with the given page size
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }
}

/// What a page RPC selects: every entity of one kind, optionally below an ancestor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    /// Application to scan
    pub app: String,
    /// Entity kind
    pub kind: String,
    /// Restrict to descendants of this key
    pub ancestor: Option<Key>,
}

/// One page returned by [`Connection::fetch_page`]
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Entities in key order
    pub entities: Vec<Entity>,
    /// Whether more entities follow the last one
    pub more: bool,
}

/// A runnable query
#[async_trait(?Send)]
pub trait Query {
    /// Run the query and return its first batch
    async fn run(&self, conn: Rc<dyn Connection>, options: &QueryOptions) -> Result<QueryBatch>;
}

/// Continuation of a query after a batch
#[async_trait(?Send)]
pub trait BatchCursor {
    /// Fetch the batch following the one this cursor came from
    async fn next(self: Box<Self>, options: &QueryOptions) -> Result<QueryBatch>;
}

/// One batch of query results
pub struct QueryBatch {
    /// Results in query order
    pub results: Vec<Entity>,
    next: Option<Box<dyn BatchCursor>>,
}

impl QueryBatch {
    /// Create a batch; `next` is `None` on the final batch
    pub fn new(results: Vec<Entity>, next: Option<Box<dyn BatchCursor>>) -> Self {
        Self { results, next }
    }

    /// Whether another batch follows
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    /// Split into results and the cursor for the next batch
    pub fn into_parts(self) -> (Vec<Entity>, Option<Box<dyn BatchCursor>>) {
        (self.results, self.next)
    }
}

/// Query for every entity of a kind, optionally restricted to an ancestor
///
/// Results come back in key order.
#[derive(Debug, Clone)]
pub struct KindQuery {
    filter: QueryFilter,
}

impl KindQuery {
    /// Query every entity of `kind` in `app`
    pub fn new(app: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            filter: QueryFilter {
                app: app.into(),
                kind: kind.into(),
                ancestor: None,
            },
        }
    }

    /// Restrict to descendants of `ancestor`
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.filter.ancestor = Some(ancestor);
        self
    }

    /// The filter sent with every page RPC
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }
}

#[async_trait(?Send)]
impl Query for KindQuery {
    async fn run(&self, conn: Rc<dyn Connection>, options: &QueryOptions) -> Result<QueryBatch> {
        fetch_batch(conn, self.filter.clone(), None, options).await
    }
}

struct KindCursor {
    conn: Rc<dyn Connection>,
    filter: QueryFilter,
    last_key: Key,
}

#[async_trait(?Send)]
impl BatchCursor for KindCursor {
    async fn next(self: Box<Self>, options: &QueryOptions) -> Result<QueryBatch> {
        let KindCursor {
            conn,
            filter,
            last_key,
        } = *self;
        fetch_batch(conn, filter, Some(last_key), options).await
    }
}

async fn fetch_batch(
    conn: Rc<dyn Connection>,
    filter: QueryFilter,
    start_after: Option<Key>,
    options: &QueryOptions,
) -> Result<QueryBatch> {
    let page = conn.fetch_page(options, &filter, start_after).await?;
    if !page.more {
        return Ok(QueryBatch::new(page.entities, None));
    }
    let last_key = page
        .entities
        .last()
        .and_then(|e| e.key().cloned())
        .ok_or_else(|| {
            Error::InvalidEntity("query page with more results must end in a keyed entity".into())
        })?;
    let cursor = KindCursor {
        conn,
        filter,
        last_key,
    };
    Ok(QueryBatch::new(page.entities, Some(Box::new(cursor))))
}
