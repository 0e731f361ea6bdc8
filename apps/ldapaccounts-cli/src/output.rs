//! CSV output
//!
//! Rows go to stdout as delimiter-separated values. Without an action the
//! columns are `id;ldap;email;firstname;lastname`; with one, each row is
//! prefixed with the run date and suffixed with the applied action.

use std::io::Write;

use chrono::Local;
use ldapaccounts_reconcile::{ReconciliationRow, RowSink, SinkError};

use crate::error::{CliError, CliResult};

/// Record columns written after `id` and `ldap`.
pub const RECORD_COLUMNS: [&str; 3] = ["email", "firstname", "lastname"];

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a delimiter option: one of `; , | ~ :` or `tab`.
pub fn parse_delimiter(value: &str) -> CliResult<u8> {
    match value {
        ";" => Ok(b';'),
        "," => Ok(b','),
        "|" => Ok(b'|'),
        "~" => Ok(b'~'),
        ":" => Ok(b':'),
        "\t" => Ok(b'\t'),
        v if v.eq_ignore_ascii_case("tab") || v == "\\t" => Ok(b'\t'),
        other => Err(CliError::InvalidDelimiter(other.to_string())),
    }
}

/// Row sink writing CSV.
pub struct CsvRowSink<W: Write> {
    writer: csv::Writer<W>,
    primary_key: String,
    join_field: String,
    with_action: bool,
}

impl<W: Write> CsvRowSink<W> {
    /// Create the sink and write the header.
    pub fn new(
        out: W,
        delimiter: u8,
        primary_key: impl Into<String>,
        join_field: impl Into<String>,
        with_action: bool,
    ) -> CliResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(out);

        let mut header = Vec::with_capacity(7);
        if with_action {
            header.push("date");
        }
        header.extend(["id", "ldap"]);
        header.extend(RECORD_COLUMNS);
        if with_action {
            header.push("action");
        }
        writer.write_record(&header)?;

        Ok(Self {
            writer,
            primary_key: primary_key.into(),
            join_field: join_field.into(),
            with_action,
        })
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> CliResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| CliError::Output(e.error().to_string()))
    }

    fn columns(&self, row: &ReconciliationRow) -> Vec<String> {
        let mut columns = Vec::with_capacity(7);
        if self.with_action {
            columns.push(
                row.timestamp
                    .with_timezone(&Local)
                    .format(DATE_FORMAT)
                    .to_string(),
            );
        }
        columns.push(row.record.get_text(&self.primary_key));
        columns.push(row.directory_status.to_string());
        for column in RECORD_COLUMNS {
            let field = if column == "email" {
                self.join_field.as_str()
            } else {
                column
            };
            columns.push(row.record.get_text(field));
        }
        if self.with_action {
            columns.push(row.applied.map(|a| a.to_string()).unwrap_or_default());
        }
        columns
    }
}

impl<W: Write> RowSink for CsvRowSink<W> {
    fn accept(&mut self, row: ReconciliationRow) -> Result<(), SinkError> {
        let columns = self.columns(&row);
        self.writer.write_record(&columns)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
