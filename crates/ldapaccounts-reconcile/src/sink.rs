//! Output rows and the sinks that receive them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ldapaccounts_connector::operation::Record;

use crate::types::{DirectoryStatus, MutationIntent};

/// Error raised by a sink.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// One local record with its directory status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRow {
    pub record: Record,
    pub directory_status: DirectoryStatus,
    /// Action applied to the record in this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<MutationIntent>,
    /// Start of the run that produced the row.
    pub timestamp: DateTime<Utc>,
}

impl ReconciliationRow {
    /// Primary key of the record, if it is an integer.
    pub fn id(&self, primary_key: &str) -> Option<i64> {
        self.record.get_integer(primary_key)
    }
}

/// Receives rows in page order.
pub trait RowSink {
    fn accept(&mut self, row: ReconciliationRow) -> Result<(), SinkError>;

    /// Called once after the last row of a successful run.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl RowSink for Vec<ReconciliationRow> {
    fn accept(&mut self, row: ReconciliationRow) -> Result<(), SinkError> {
        self.push(row);
        Ok(())
    }
}
