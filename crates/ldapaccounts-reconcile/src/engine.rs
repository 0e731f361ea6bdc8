//! Reconciliation engine.
//!
//! Walks the local records page by page, looks up each page's join keys in
//! the directory with one batched search, and merges the answer back into the
//! records. Absent records can be flagged; the flag update for a page commits
//! before the next page is read. Flagging runs page by primary key, since the
//! update may move records out of the filtered set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use ldapaccounts_connector::error::ConnectorError;
use ldapaccounts_connector::operation::{Record, SearchRequest};
use ldapaccounts_connector::query::RecordQuery;
use ldapaccounts_connector::traits::DirectoryLookup;

use crate::sink::{ReconciliationRow, RowSink, SinkError};
use crate::statistics::RunStatistics;
use crate::types::{DirectoryStatus, MutationIntent, RunStatus};

/// Configuration of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Local column holding the join key.
    #[serde(default = "default_join_field")]
    pub join_field: String,
    /// Directory attribute matched against the join key.
    #[serde(default = "default_directory_join_field")]
    pub directory_join_field: String,
    /// Filter fragment every directory entry must also match.
    #[serde(default)]
    pub query_prefix: Option<String>,
    /// Action applied to records absent from the directory.
    #[serde(default)]
    pub mutation: Option<MutationIntent>,
    /// Only emit rows with this status.
    #[serde(default)]
    pub status_filter: Option<DirectoryStatus>,
    /// First page to process.
    #[serde(default = "default_start_page")]
    pub start_page: u64,
}

fn default_join_field() -> String {
    "email".to_string()
}

fn default_directory_join_field() -> String {
    "mail".to_string()
}

fn default_start_page() -> u64 {
    1
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            join_field: default_join_field(),
            directory_join_field: default_directory_join_field(),
            query_prefix: None,
            mutation: None,
            status_filter: None,
            start_page: default_start_page(),
        }
    }
}

impl ReconcileConfig {
    pub fn with_join_field(mut self, field: impl Into<String>) -> Self {
        self.join_field = field.into();
        self
    }

    pub fn with_directory_join_field(mut self, field: impl Into<String>) -> Self {
        self.directory_join_field = field.into();
        self
    }

    /// Set the fixed query prefix. Blank prefixes are ignored.
    pub fn with_query_prefix(mut self, prefix: Option<String>) -> Self {
        self.query_prefix = prefix.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_mutation(mut self, mutation: Option<MutationIntent>) -> Self {
        self.mutation = mutation;
        self
    }

    pub fn with_status_filter(mut self, status: Option<DirectoryStatus>) -> Self {
        self.status_filter = status;
        self
    }

    pub fn with_start_page(mut self, page: u64) -> Self {
        self.start_page = page;
        self
    }
}

/// Reconciliation errors. Every error ends the run.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Connect, bind or search failed.
    #[error("{0}")]
    Directory(#[source] ConnectorError),

    /// Reading or updating local records failed.
    #[error("{0}")]
    Store(#[source] ConnectorError),

    /// The output sink rejected a row.
    #[error("output error: {0}")]
    Sink(#[source] SinkError),
}

impl ReconciliationError {
    /// The underlying connector error, if any.
    pub fn connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Directory(e) | Self::Store(e) => Some(e),
            Self::Sink(_) => None,
        }
    }
}

/// Result type for reconciliation operations.
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub statistics: RunStatistics,
    pub started_at: DateTime<Utc>,
}

/// Drives one reconciliation run at a time against a directory.
pub struct Reconciler<D: DirectoryLookup> {
    directory: D,
    config: ReconcileConfig,
    status: RunStatus,
    statistics: RunStatistics,
}

impl<D: DirectoryLookup> Reconciler<D> {
    /// Create a new reconciler.
    pub fn new(directory: D, config: ReconcileConfig) -> Self {
        Self {
            directory,
            config,
            status: RunStatus::Pending,
            statistics: RunStatistics::new(),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Status of the last run.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Statistics of the last run, including a failed one.
    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Give back the directory client.
    pub fn into_directory(self) -> D {
        self.directory
    }

    /// Run a full reconciliation over `query`, writing rows to `sink`.
    ///
    /// The directory connection is closed whether the run succeeds or not.
    /// Flag updates of pages processed before a failure stay committed.
    pub async fn run(
        &mut self,
        query: &mut RecordQuery,
        sink: &mut dyn RowSink,
    ) -> ReconciliationResult<RunReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        self.status = RunStatus::Running;
        self.statistics = RunStatistics::new();

        info!(
            join_field = %self.config.join_field,
            directory_join_field = %self.config.directory_join_field,
            mutation = ?self.config.mutation,
            "Starting reconciliation run"
        );

        let outcome = self.process(query, sink, started_at).await;
        let closed = self.directory.close().await;
        self.statistics.set_duration(started.elapsed());

        let outcome = outcome.and_then(|()| closed.map_err(ReconciliationError::Directory));
        match outcome {
            Ok(()) => {
                self.status = RunStatus::Completed;
                info!(
                    records = self.statistics.records_processed,
                    pages = self.statistics.pages_processed,
                    present = self.statistics.present,
                    absent = self.statistics.absent,
                    mutated = self.statistics.mutated,
                    rows = self.statistics.rows_emitted,
                    duration_ms = self.statistics.duration_ms,
                    "Reconciliation run completed"
                );
                Ok(RunReport {
                    status: self.status,
                    statistics: self.statistics.clone(),
                    started_at,
                })
            }
            Err(e) => {
                self.status = RunStatus::Failed;
                warn!(
                    error = %e,
                    pages = self.statistics.pages_processed,
                    mutated = self.statistics.mutated,
                    "Reconciliation run failed"
                );
                Err(e)
            }
        }
    }

    async fn process(
        &mut self,
        query: &mut RecordQuery,
        sink: &mut dyn RowSink,
        timestamp: DateTime<Utc>,
    ) -> ReconciliationResult<()> {
        let mut extra_fields = vec![self.config.join_field.clone()];
        if let Some(intent) = self.config.mutation {
            extra_fields.push(intent.field().to_string());
        }
        query
            .add_selected_fields(&extra_fields)
            .map_err(ReconciliationError::Store)?;
        query
            .set_page(self.config.start_page)
            .map_err(ReconciliationError::Store)?;

        let primary_key = query.schema().primary_key().to_string();

        loop {
            let page = query.fetch_page().await.map_err(ReconciliationError::Store)?;
            if page.is_empty() {
                break;
            }
            self.statistics.records_total = page.total;

            let found = self.lookup(&page.records).await?;

            let mut matched = Vec::with_capacity(page.records.len());
            let mut to_flag = BTreeSet::new();
            for record in page.records.iter() {
                let key = join_key(record, &self.config.join_field);
                let status = DirectoryStatus::from(!key.is_empty() && found.contains(&key));
                self.statistics.record_status(status);

                if self.config.status_filter.is_some_and(|wanted| wanted != status) {
                    continue;
                }

                if let Some(intent) = self.config.mutation {
                    if status == DirectoryStatus::Absent && !record.is_flag_set(intent.field()) {
                        match record.get_integer(&primary_key) {
                            Some(id) => {
                                to_flag.insert(id);
                            }
                            None => warn!(
                                field = %primary_key,
                                "Record without integer primary key, not flagged"
                            ),
                        }
                    }
                }
                matched.push((record, status));
            }

            // Only ids the store actually changed count; another writer may
            // have set the flag since the page was read.
            let mut flagged = BTreeSet::new();
            if let Some(intent) = self.config.mutation {
                if !to_flag.is_empty() {
                    let ids: Vec<i64> = to_flag.iter().copied().collect();
                    let updated = query
                        .store()
                        .flag_records(intent.field(), &ids)
                        .await
                        .map_err(ReconciliationError::Store)?;
                    if updated.len() < ids.len() {
                        debug!(
                            queued = ids.len(),
                            updated = updated.len(),
                            "Some records were already flagged"
                        );
                    }
                    flagged.extend(updated.into_iter().filter(|id| to_flag.contains(id)));
                    self.statistics.mutated += flagged.len() as u64;
                }
            }

            for (record, status) in matched {
                let row = match self.config.mutation {
                    None => ReconciliationRow {
                        record: record.clone(),
                        directory_status: status,
                        applied: None,
                        timestamp,
                    },
                    Some(intent) => {
                        let applied = record
                            .get_integer(&primary_key)
                            .is_some_and(|id| flagged.contains(&id));
                        if !applied {
                            continue;
                        }
                        let mut record = record.clone();
                        record.set(intent.field(), 1i64);
                        ReconciliationRow {
                            record,
                            directory_status: status,
                            applied: Some(intent),
                            timestamp,
                        }
                    }
                };
                sink.accept(row).map_err(ReconciliationError::Sink)?;
                self.statistics.rows_emitted += 1;
            }

            self.statistics.record_page(page.records.len());
            debug!(
                page = query.page(),
                records = page.records.len(),
                flagged = flagged.len(),
                "Processed page"
            );

            let last_key = page
                .records
                .last()
                .and_then(|record| record.get_integer(&primary_key));
            match (self.config.mutation, last_key) {
                (Some(_), Some(key)) => query.advance_past(key),
                _ => query.advance_page(),
            }
        }

        sink.finish().map_err(ReconciliationError::Sink)?;
        Ok(())
    }

    /// Search the directory for the page's join keys.
    ///
    /// Returns the normalized keys that were found.
    async fn lookup(&mut self, records: &[Record]) -> ReconciliationResult<HashSet<String>> {
        let mut values: HashMap<String, String> = HashMap::new();
        let mut ordered = Vec::new();
        for record in records {
            let raw = record.get_text(&self.config.join_field);
            let key = normalize(&raw);
            if key.is_empty() || values.contains_key(&key) {
                continue;
            }
            values.insert(key.clone(), raw.trim().to_string());
            ordered.push(key);
        }

        if ordered.is_empty() {
            debug!("No join keys on page, skipping directory search");
            return Ok(HashSet::new());
        }

        let request = SearchRequest::new(
            &self.config.directory_join_field,
            ordered
                .iter()
                .filter_map(|key| values.get(key).cloned())
                .collect(),
        )
        .with_query_prefix(self.config.query_prefix.clone());

        let result = self
            .directory
            .search(&request)
            .await
            .map_err(ReconciliationError::Directory)?;

        let attribute = self.config.directory_join_field.to_lowercase();
        let found: HashSet<String> = result
            .values_of(&attribute)
            .map(normalize)
            .filter(|key| values.contains_key(key))
            .collect();

        debug!(
            searched = ordered.len(),
            entries = result.count,
            found = found.len(),
            "Directory lookup finished"
        );
        Ok(found)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn join_key(record: &Record, field: &str) -> String {
    normalize(&record.get_text(field))
}
