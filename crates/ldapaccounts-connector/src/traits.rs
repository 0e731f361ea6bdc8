//! Collaborator traits
//!
//! The two external systems a reconciliation run talks to. Both are narrow on
//! purpose: the record store only answers planned queries and sets flags, the
//! directory only answers batched lookups.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::operation::{DirectorySearchResult, Record, SearchRequest};
use crate::query::QueryPlan;
use crate::schema::RecordSchema;

/// Local store of user records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Introspect the record table.
    async fn schema(&self) -> ConnectorResult<RecordSchema>;

    /// Count the records matching the plan's predicate.
    async fn count(&self, plan: &QueryPlan) -> ConnectorResult<u64>;

    /// Fetch one page of records, ordered by primary key ascending.
    async fn select(&self, plan: &QueryPlan) -> ConnectorResult<Vec<Record>>;

    /// Set `flag` to 1 on every listed record where it is still 0.
    ///
    /// Runs as a single statement. Returns the ids actually changed, in
    /// ascending order; records whose flag was already set are left out.
    async fn flag_records(&self, flag: &str, ids: &[i64]) -> ConnectorResult<Vec<i64>>;
}

/// Directory answering batched join-key lookups.
///
/// Implementations own their connection and open it lazily on the first
/// search. `close` must be safe to call more than once.
#[async_trait]
pub trait DirectoryLookup: Send {
    /// Look up a batch of join-key values.
    ///
    /// An empty value list returns an empty result without contacting the
    /// server.
    async fn search(&mut self, request: &SearchRequest) -> ConnectorResult<DirectorySearchResult>;

    /// Release the connection.
    async fn close(&mut self) -> ConnectorResult<()>;
}
