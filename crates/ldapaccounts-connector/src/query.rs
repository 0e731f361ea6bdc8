//! Record query planner
//!
//! Turns a [`FilterSet`], a projection and a page cursor into a [`QueryPlan`]
//! the record store can execute, and walks the result page by page.
//!
//! Pages are ordered by primary key ascending, so concatenating the non-empty
//! pages of an unchanged table reproduces the full filtered set. The total
//! count is computed once per filter and cached until the filter changes.
//!
//! Offset paging skips rows when earlier pages are modified out of the
//! filtered set between fetches. Callers that update the rows they read move
//! on with [`RecordQuery::advance_past`], which pages by primary key instead.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::filter::{self, FilterSet, Operator, Predicate};
use crate::operation::Record;
use crate::schema::{ColumnType, RecordSchema};
use crate::traits::RecordStore;

/// Default page size of interactive reports.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// A bound query argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryArg {
    Integer(i64),
    Boolean(bool),
    Text(String),
}

/// Rendered predicate with `$n` placeholders and their arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereClause {
    pub sql: String,
    pub args: Vec<QueryArg>,
}

/// Everything the record store needs to run one page query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub table: String,
    /// Selected columns; empty selects every column.
    pub projection: Vec<String>,
    pub filter: FilterSet,
    pub where_clause: WhereClause,
    /// Primary key, always sorted ascending.
    pub order_by: String,
    pub limit: u64,
    pub offset: u64,
    /// Keyset bound: only records whose primary key is greater. Already part
    /// of `filter` and `where_clause`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_key: Option<i64>,
}

/// One page of records plus the cached total for the current filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub total: u64,
}

impl RecordPage {
    /// Check if the page has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lifecycle of a [`RecordQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Unconfigured,
    Configured,
    Paginating,
}

/// Paginated query over the local record store.
pub struct RecordQuery {
    store: Arc<dyn RecordStore>,
    schema: RecordSchema,
    filter: FilterSet,
    selected_fields: Vec<String>,
    page_size: u64,
    page: u64,
    after_key: Option<i64>,
    state: QueryState,
    where_cache: Option<WhereClause>,
    count_cache: Option<u64>,
}

impl std::fmt::Debug for RecordQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordQuery")
            .field("table", &self.schema.table())
            .field("filter", &self.filter)
            .field("selected_fields", &self.selected_fields)
            .field("page_size", &self.page_size)
            .field("page", &self.page)
            .field("after_key", &self.after_key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RecordQuery {
    /// Create a query over a store whose schema is already known.
    pub fn new(store: Arc<dyn RecordStore>, schema: RecordSchema) -> Self {
        Self {
            store,
            schema,
            filter: FilterSet::new(),
            selected_fields: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            after_key: None,
            state: QueryState::Unconfigured,
            where_cache: None,
            count_cache: None,
        }
    }

    /// Create a query, introspecting the store's schema first.
    pub async fn open(store: Arc<dyn RecordStore>) -> ConnectorResult<Self> {
        let schema = store.schema().await?;
        Ok(Self::new(store, schema))
    }

    /// Schema the query validates against.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Store the query reads from.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Current filter.
    pub fn filter(&self) -> &FilterSet {
        &self.filter
    }

    /// Current projection (empty means every column).
    pub fn selected_fields(&self) -> &[String] {
        &self.selected_fields
    }

    /// Current page number, starting at 1.
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Primary key the current page starts after, when paging by key.
    pub fn after_key(&self) -> Option<i64> {
        self.after_key
    }

    /// Current page size.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Replace the filter. Invalidates the cached predicate and count.
    pub fn set_filter(&mut self, filter: FilterSet) -> ConnectorResult<()> {
        filter::validate(&filter, &self.schema)?;
        self.filter = filter;
        self.where_cache = None;
        self.count_cache = None;
        self.after_key = None;
        self.state = QueryState::Configured;
        Ok(())
    }

    /// Replace the projection. The primary key is always included.
    pub fn set_selected_fields<S: AsRef<str>>(&mut self, fields: &[S]) -> ConnectorResult<()> {
        self.schema
            .validate_fields(fields.iter().map(AsRef::as_ref))?;

        self.selected_fields.clear();
        if !fields.is_empty() {
            self.selected_fields
                .push(self.schema.primary_key().to_string());
            for field in fields {
                self.push_field(field.as_ref());
            }
        }
        self.mark_configured();
        Ok(())
    }

    /// Add columns to the projection. No-op while every column is selected.
    pub fn add_selected_fields<S: AsRef<str>>(&mut self, fields: &[S]) -> ConnectorResult<()> {
        self.schema
            .validate_fields(fields.iter().map(AsRef::as_ref))?;

        if !self.selected_fields.is_empty() {
            for field in fields {
                self.push_field(field.as_ref());
            }
        }
        self.mark_configured();
        Ok(())
    }

    /// Set the number of records per page.
    pub fn set_page_size(&mut self, size: u64) -> ConnectorResult<()> {
        if size < 1 {
            return Err(ConnectorError::invalid_argument(
                "page size must be at least 1",
            ));
        }
        self.page_size = size;
        self.mark_configured();
        Ok(())
    }

    /// Jump to a page. Pages are numbered from 1.
    pub fn set_page(&mut self, page: u64) -> ConnectorResult<()> {
        if page < 1 {
            return Err(ConnectorError::invalid_argument(
                "page numbers start at 1",
            ));
        }
        self.page = page;
        self.after_key = None;
        Ok(())
    }

    /// Move to the next page. There is no upper bound; past the end pages are empty.
    ///
    /// Offset paging only. Once [`advance_past`](Self::advance_past) was used,
    /// keep using it until the next `set_page` or `set_filter`.
    pub fn advance_page(&mut self) {
        self.page += 1;
    }

    /// Move to the page of records following primary key `last_key`.
    ///
    /// The next page is selected by `pk > last_key` instead of an offset, so
    /// rows of earlier pages leaving the filtered set do not shift it.
    pub fn advance_past(&mut self, last_key: i64) {
        self.page += 1;
        self.after_key = Some(last_key);
    }

    /// Row offset of the current page. Zero while paging by key.
    pub fn offset(&self) -> u64 {
        match self.after_key {
            Some(_) => 0,
            None => (self.page - 1).saturating_mul(self.page_size),
        }
    }

    /// Rendered predicate for the current filter, cached until `set_filter`.
    pub fn where_clause(&mut self) -> ConnectorResult<&WhereClause> {
        let clause = match self.where_cache.take() {
            Some(clause) => clause,
            None => render_where(&self.filter, &self.schema)?,
        };
        Ok(self.where_cache.insert(clause))
    }

    /// Build the plan for the current page.
    pub fn plan(&mut self) -> ConnectorResult<QueryPlan> {
        self.build_plan(self.after_key)
    }

    fn build_plan(&mut self, after_key: Option<i64>) -> ConnectorResult<QueryPlan> {
        let primary_key = self.schema.primary_key().to_string();
        let mut where_clause = self.where_clause()?.clone();
        let mut filter = self.filter.clone();

        if let Some(key) = after_key {
            where_clause.args.push(QueryArg::Integer(key));
            let bound = format!(
                "{} > ${}",
                escape_identifier(&primary_key),
                where_clause.args.len()
            );
            where_clause.sql = if filter.is_empty() {
                bound
            } else {
                format!("{} AND {bound}", where_clause.sql)
            };
            filter.push(Predicate::new(&primary_key, Operator::Gt, key.to_string()));
        }

        Ok(QueryPlan {
            table: self.schema.table().to_string(),
            projection: self.selected_fields.clone(),
            filter,
            where_clause,
            order_by: primary_key,
            limit: self.page_size,
            offset: self.offset(),
            after_key,
        })
    }

    /// Cached total for the current filter (0 before it was computed).
    pub fn record_count(&self) -> u64 {
        self.count_cache.unwrap_or(0)
    }

    /// Total number of records matching the current filter.
    pub async fn total_count(&mut self) -> ConnectorResult<u64> {
        if let Some(total) = self.count_cache {
            return Ok(total);
        }
        let plan = self.build_plan(None)?;
        let total = self.store.count(&plan).await?;
        debug!(table = %plan.table, total, "Counted matching records");
        self.count_cache = Some(total);
        Ok(total)
    }

    /// Fetch the current page. Returns an empty page once past the end.
    pub async fn fetch_page(&mut self) -> ConnectorResult<RecordPage> {
        let total = self.total_count().await?;
        let plan = self.plan()?;
        let records = self.store.select(&plan).await?;
        self.state = QueryState::Paginating;

        debug!(
            page = self.page,
            after_key = ?self.after_key,
            page_size = self.page_size,
            returned = records.len(),
            total,
            "Fetched record page"
        );

        Ok(RecordPage { records, total })
    }

    fn push_field(&mut self, field: &str) {
        if !self.selected_fields.iter().any(|f| f == field) {
            self.selected_fields.push(field.to_string());
        }
    }

    fn mark_configured(&mut self) {
        if self.state == QueryState::Unconfigured {
            self.state = QueryState::Configured;
        }
    }
}

/// Quote a SQL identifier.
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Render a filter set as a parameterized predicate.
///
/// Values are bound with the type of their column. Pattern predicates compare
/// the text form of the column case-insensitively.
pub fn render_where(filter: &FilterSet, schema: &RecordSchema) -> ConnectorResult<WhereClause> {
    filter::validate(filter, schema)?;

    if filter.is_empty() {
        return Ok(WhereClause {
            sql: "TRUE".to_string(),
            args: Vec::new(),
        });
    }

    let mut conditions = Vec::with_capacity(filter.len());
    let mut args = Vec::with_capacity(filter.len());

    for predicate in filter.iter() {
        let column_type = schema
            .column_type(&predicate.field)
            .unwrap_or(ColumnType::Other);
        let column = escape_identifier(&predicate.field);
        let placeholder = args.len() + 1;

        let condition = match (predicate.operator, column_type) {
            (Operator::Like, _) => {
                args.push(QueryArg::Text(predicate.value.clone()));
                format!("{column}::text ILIKE ${placeholder}")
            }
            (op, ColumnType::Other) => {
                args.push(QueryArg::Text(predicate.value.clone()));
                format!("{column}::text {} ${placeholder}", sql_operator(op))
            }
            (op, column_type) => {
                args.push(bind_value(predicate, column_type)?);
                format!("{column} {} ${placeholder}", sql_operator(op))
            }
        };
        conditions.push(condition);
    }

    Ok(WhereClause {
        sql: conditions.join(" AND "),
        args,
    })
}

fn sql_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Lt => "<",
        Operator::Gt => ">",
        Operator::Le => "<=",
        Operator::Ge => ">=",
        Operator::Like => "ILIKE",
    }
}

fn bind_value(predicate: &Predicate, column_type: ColumnType) -> ConnectorResult<QueryArg> {
    let invalid = || ConnectorError::InvalidFilterValue {
        field: predicate.field.clone(),
        value: predicate.value.clone(),
    };
    let value = predicate.value.trim();

    match column_type {
        ColumnType::Integer => value.parse().map(QueryArg::Integer).map_err(|_| invalid()),
        ColumnType::Boolean => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "t" => Ok(QueryArg::Boolean(true)),
            "0" | "false" | "f" => Ok(QueryArg::Boolean(false)),
            _ => Err(invalid()),
        },
        ColumnType::Text | ColumnType::Other => Ok(QueryArg::Text(predicate.value.clone())),
    }
}
