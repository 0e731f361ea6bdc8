//! Record schema
//!
//! The set of columns a filter or projection may reference, as introspected
//! from the record store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConnectorError, ConnectorResult};

/// Storage type of a column, used to bind filter values with the right type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Text,
    Boolean,
    /// Any other type; compared through its text form.
    Other,
}

impl ColumnType {
    /// Map a SQL type name (as reported by `information_schema`) to a column type.
    pub fn from_sql_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => ColumnType::Integer,
            "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" => {
                ColumnType::Text
            }
            "boolean" | "bool" => ColumnType::Boolean,
            _ => ColumnType::Other,
        }
    }
}

/// Columns of the local record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    table: String,
    primary_key: String,
    columns: BTreeMap<String, ColumnType>,
}

impl RecordSchema {
    /// Create a schema with only the primary key column.
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let primary_key = primary_key.into();
        let mut columns = BTreeMap::new();
        columns.insert(primary_key.clone(), ColumnType::Integer);
        Self {
            table: table.into(),
            primary_key,
            columns,
        }
    }

    /// Add a column using builder pattern.
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Primary key column name.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Get the type of a column.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }

    /// Iterate over column names in name order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Fail with `UnknownField` naming the first field not in the schema.
    pub fn validate_fields<'a, I>(&self, fields: I) -> ConnectorResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match fields.into_iter().find(|f| !self.has_column(f)) {
            Some(field) => Err(ConnectorError::unknown_field(field)),
            None => Ok(()),
        }
    }
}
