//! PostgreSQL record store
//!
//! Implements [`RecordStore`] over a lazily created `sqlx` pool. Every query
//! is built from a [`QueryPlan`] whose predicate is already rendered with
//! `$n` placeholders; this module only adds the table, projection, ordering
//! and paging around it.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use ldapaccounts_connector::config::ConnectorConfig;
use ldapaccounts_connector::error::{ConnectorError, ConnectorResult};
use ldapaccounts_connector::operation::{AttributeValue, Record};
use ldapaccounts_connector::query::{escape_identifier, QueryArg, QueryPlan};
use ldapaccounts_connector::schema::{ColumnType, RecordSchema};
use ldapaccounts_connector::traits::RecordStore;

use crate::config::DatabaseConfig;

/// Record store backed by a PostgreSQL user table.
pub struct DatabaseConnector {
    config: DatabaseConfig,

    /// Connection pool (lazily initialized).
    pool: OnceCell<PgPool>,
}

impl std::fmt::Debug for DatabaseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnector")
            .field("config", &self.config.redacted())
            .field("connected", &self.pool.initialized())
            .finish()
    }
}

impl DatabaseConnector {
    /// Create a new record store. No connection is opened yet.
    pub fn new(config: DatabaseConfig) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: OnceCell::new(),
        })
    }

    /// Create a record store over an existing pool.
    pub fn with_pool(config: DatabaseConfig, pool: PgPool) -> ConnectorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: OnceCell::new_with(Some(pool)),
        })
    }

    /// Configuration of this store.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    async fn get_pool(&self) -> ConnectorResult<&PgPool> {
        self.pool.get_or_try_init(|| self.create_pool()).await
    }

    async fn create_pool(&self) -> ConnectorResult<PgPool> {
        debug!(table = %self.config.users_table, "Creating database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(self.config.connection.pool_size)
            .acquire_timeout(self.config.connection.connection_timeout())
            .connect(&self.config.url)
            .await
            .map_err(|e| {
                ConnectorError::database_with_source(
                    format!(
                        "failed to connect to {}",
                        crate::config::redact_url(&self.config.url)
                    ),
                    e,
                )
            })?;

        info!("Database connection pool established");
        Ok(pool)
    }

    /// Schema-qualified, quoted user table.
    fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            escape_identifier(&self.config.schema),
            escape_identifier(&self.config.users_table)
        )
    }
}

#[async_trait]
impl RecordStore for DatabaseConnector {
    #[instrument(skip(self), fields(table = %self.config.users_table))]
    async fn schema(&self) -> ConnectorResult<RecordSchema> {
        let pool = self.get_pool().await?;

        let rows: Vec<PgRow> = sqlx::query(
            r"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            ",
        )
        .bind(&self.config.schema)
        .bind(&self.config.users_table)
        .fetch_all(pool)
        .await
        .map_err(|e| ConnectorError::database_with_source("schema introspection failed", e))?;

        if rows.is_empty() {
            return Err(ConnectorError::invalid_configuration(format!(
                "table {}.{} not found",
                self.config.schema, self.config.users_table
            )));
        }

        let mut schema = RecordSchema::new(&self.config.users_table, &self.config.user_id_column);
        let mut has_primary_key = false;
        for row in rows {
            let column_name: String = row.try_get("column_name").unwrap_or_default();
            let data_type: String = row.try_get("data_type").unwrap_or_default();
            has_primary_key |= column_name == self.config.user_id_column;
            schema = schema.with_column(column_name, ColumnType::from_sql_type(&data_type));
        }

        if !has_primary_key {
            return Err(ConnectorError::invalid_configuration(format!(
                "column {} not found in {}",
                self.config.user_id_column, self.config.users_table
            )));
        }

        debug!(columns = schema.column_names().count(), "Introspected user table");
        Ok(schema)
    }

    #[instrument(skip(self, plan))]
    async fn count(&self, plan: &QueryPlan) -> ConnectorResult<u64> {
        let pool = self.get_pool().await?;
        let sql = count_sql(&self.qualified_table(), plan);

        let row = bind_args(sqlx::query(&sql), &plan.where_clause.args)
            .fetch_one(pool)
            .await
            .map_err(|e| ConnectorError::database_with_source("count query failed", e))?;
        let total: i64 = row
            .try_get(0)
            .map_err(|e| ConnectorError::database_with_source("count query failed", e))?;

        Ok(u64::try_from(total).unwrap_or(0))
    }

    #[instrument(skip(self, plan), fields(offset = plan.offset, limit = plan.limit))]
    async fn select(&self, plan: &QueryPlan) -> ConnectorResult<Vec<Record>> {
        let pool = self.get_pool().await?;
        let sql = select_sql(&self.qualified_table(), plan);

        let rows: Vec<PgRow> = bind_args(sqlx::query(&sql), &plan.where_clause.args)
            .fetch_all(pool)
            .await
            .map_err(|e| ConnectorError::database_with_source("select query failed", e))?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn flag_records(&self, flag: &str, ids: &[i64]) -> ConnectorResult<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.get_pool().await?;
        let sql = flag_sql(
            &self.qualified_table(),
            flag,
            &self.config.user_id_column,
            self.config.modified_column.as_deref(),
        );

        let mut query = sqlx::query(&sql);
        if self.config.modified_column.is_some() {
            query = query.bind(chrono::Utc::now().timestamp());
        }
        let rows = query
            .bind(ids)
            .fetch_all(pool)
            .await
            .map_err(|e| ConnectorError::database_with_source("flag update failed", e))?;

        let mut updated = rows
            .iter()
            .map(|row| row.try_get::<i64, _>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectorError::database_with_source("flag update returned no id", e))?;
        updated.sort_unstable();

        info!(
            flag,
            requested = ids.len(),
            updated = updated.len(),
            "Flagged records"
        );
        Ok(updated)
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [QueryArg],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            QueryArg::Integer(value) => query.bind(*value),
            QueryArg::Boolean(value) => query.bind(*value),
            QueryArg::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

fn count_sql(table: &str, plan: &QueryPlan) -> String {
    format!(
        "SELECT COUNT(*) FROM {table} WHERE {}",
        plan.where_clause.sql
    )
}

fn select_sql(table: &str, plan: &QueryPlan) -> String {
    let projection = if plan.projection.is_empty() {
        "*".to_string()
    } else {
        plan.projection
            .iter()
            .map(|c| escape_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "SELECT {projection} FROM {table} WHERE {} ORDER BY {} ASC LIMIT {} OFFSET {}",
        plan.where_clause.sql,
        escape_identifier(&plan.order_by),
        plan.limit,
        plan.offset
    )
}

/// Only moves the flag forward: rows already flagged are left untouched and
/// are not returned.
fn flag_sql(table: &str, flag: &str, id_column: &str, modified_column: Option<&str>) -> String {
    let flag = escape_identifier(flag);
    let id_column = escape_identifier(id_column);
    match modified_column {
        Some(modified) => format!(
            "UPDATE {table} SET {flag} = 1, {} = $1 WHERE {id_column} = ANY($2) AND {flag} = 0 \
             RETURNING {id_column}::bigint",
            escape_identifier(modified)
        ),
        None => format!(
            "UPDATE {table} SET {flag} = 1 WHERE {id_column} = ANY($1) AND {flag} = 0 \
             RETURNING {id_column}::bigint"
        ),
    }
}

fn row_to_record(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|column| {
            let name = column.name();
            let value = if let Ok(v) = row.try_get::<Option<i64>, _>(name) {
                AttributeValue::from(v)
            } else if let Ok(v) = row.try_get::<Option<i32>, _>(name) {
                AttributeValue::from(v)
            } else if let Ok(v) = row.try_get::<Option<i16>, _>(name) {
                AttributeValue::from(v.map(i64::from))
            } else if let Ok(v) = row.try_get::<Option<String>, _>(name) {
                AttributeValue::from(v)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(name) {
                AttributeValue::from(v)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(name) {
                AttributeValue::from(v)
            } else {
                AttributeValue::Null
            };
            (name.to_string(), value)
        })
        .collect()
}
