//! Record types
//!
//! Attribute values, the records returned by the record store, and the
//! request/result pair of a batched directory search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column value of a local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A string value.
    String(String),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether the value counts as a set flag.
    ///
    /// Non-zero numbers, `true` and strings other than `""`/`"0"` are set.
    pub fn is_truthy(&self) -> bool {
        match self {
            AttributeValue::Null => false,
            AttributeValue::Boolean(b) => *b,
            AttributeValue::Integer(i) => *i != 0,
            AttributeValue::Float(f) => *f != 0.0,
            AttributeValue::String(s) => !s.is_empty() && s != "0",
        }
    }

    /// Render the value as plain text (empty for null).
    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::Null => String::new(),
            AttributeValue::Boolean(b) => String::from(if *b { "1" } else { "0" }),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::String(s) => s.clone(),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<i32> for AttributeValue {
    fn from(i: i32) -> Self {
        AttributeValue::Integer(i64::from(i))
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(AttributeValue::Null, Into::into)
    }
}

/// One row of the local record store, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl Record {
    /// Create a new empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set a column value using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a column value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a string column.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_string)
    }

    /// Get an integer column.
    pub fn get_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttributeValue::as_integer)
    }

    /// Get a column rendered as text (empty when missing or null).
    pub fn get_text(&self, name: &str) -> String {
        self.get(name).map(AttributeValue::to_text).unwrap_or_default()
    }

    /// Whether a flag column is set. Missing columns are not set.
    pub fn is_flag_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(AttributeValue::is_truthy)
    }

    /// Check if a column exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Iterate over all columns in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<(String, AttributeValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// A batched lookup of join-key values in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Directory attribute the values are matched against (e.g. `mail`).
    pub join_field: String,
    /// Values combined in one OR group.
    pub values: Vec<String>,
    /// Attributes to return for each entry.
    pub result_fields: Vec<String>,
    /// Filter fragment every entry must also match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_prefix: Option<String>,
}

impl SearchRequest {
    /// Create a request returning only the join attribute.
    pub fn new(join_field: impl Into<String>, values: Vec<String>) -> Self {
        let join_field = join_field.into();
        Self {
            result_fields: vec![join_field.clone()],
            join_field,
            values,
            query_prefix: None,
        }
    }

    /// Set the returned attributes.
    pub fn with_result_fields(mut self, fields: Vec<String>) -> Self {
        self.result_fields = fields;
        self
    }

    /// Set the fixed query prefix. Blank prefixes are ignored.
    pub fn with_query_prefix(mut self, prefix: Option<String>) -> Self {
        self.query_prefix = prefix.filter(|p| !p.trim().is_empty());
        self
    }
}

/// A directory entry reduced to the first value of each attribute.
pub type DirectoryEntry = BTreeMap<String, String>;

/// Result of a batched directory search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySearchResult {
    /// Number of entries returned by the server.
    pub count: usize,
    pub entries: Vec<DirectoryEntry>,
}

impl DirectorySearchResult {
    /// Create a result from parsed entries.
    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            count: entries.len(),
            entries,
        }
    }

    /// Empty result, used when there was nothing to search for.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Values of one attribute across all entries.
    pub fn values_of<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter_map(move |entry| entry.get(attribute).map(String::as_str))
    }
}
