//! Batch run: local users against LDAP, CSV out.

use std::io::Write;
use std::sync::Arc;

use tracing::info;

use ldapaccounts_connector::error::ConnectorError;
use ldapaccounts_connector::query::RecordQuery;
use ldapaccounts_connector::traits::{DirectoryLookup, RecordStore};
use ldapaccounts_connector_database::DatabaseConnector;
use ldapaccounts_connector_ldap::{LdapConfig, LdapConnector};
use ldapaccounts_reconcile::{ReconcileConfig, Reconciler, RunReport};

use crate::cli::RunOptions;
use crate::config::ReportConfig;
use crate::error::{CliError, CliResult};
use crate::output::{CsvRowSink, RECORD_COLUMNS};

/// Connect to both systems and run the report.
pub async fn execute<W: Write>(
    options: &RunOptions,
    config: &ReportConfig,
    out: W,
) -> CliResult<RunReport> {
    let ldap = ldap_config(options, config);
    let reconcile = reconcile_config(options, config, &ldap);

    let store = DatabaseConnector::new(config.database.clone()).map_err(config_error)?;
    let directory = LdapConnector::new(ldap).map_err(config_error)?;

    info!(
        server = %directory.config().url(),
        table = %config.database.users_table,
        action = ?options.mutation,
        "Starting batch run"
    );

    run(Arc::new(store), directory, reconcile, options, config, out).await
}

/// LDAP settings with the command-line overrides applied.
pub fn ldap_config(options: &RunOptions, config: &ReportConfig) -> LdapConfig {
    let mut ldap = config.ldap.clone();
    if let Some(mail) = &options.ldap_mail {
        ldap = ldap.with_mail_field(mail.trim());
    }
    if let Some(query) = &options.ldap_query {
        ldap = ldap.with_query(query.clone());
    }
    ldap
}

/// Reconciliation settings for a batch run.
pub fn reconcile_config(
    options: &RunOptions,
    config: &ReportConfig,
    ldap: &LdapConfig,
) -> ReconcileConfig {
    ReconcileConfig::default()
        .with_join_field(config.join_field.clone())
        .with_directory_join_field(ldap.mail_field.clone())
        .with_query_prefix(ldap.query.clone())
        .with_mutation(options.mutation)
}

/// Run the report over already constructed collaborators.
pub async fn run<D, W>(
    store: Arc<dyn RecordStore>,
    directory: D,
    reconcile: ReconcileConfig,
    options: &RunOptions,
    config: &ReportConfig,
    out: W,
) -> CliResult<RunReport>
where
    D: DirectoryLookup,
    W: Write,
{
    let mut query = RecordQuery::open(store).await.map_err(store_error)?;
    query
        .set_filter(options.filter.clone())
        .map_err(store_error)?;

    let mut fields: Vec<&str> = vec![config.join_field.as_str()];
    fields.extend(RECORD_COLUMNS.iter().copied().filter(|c| *c != "email"));
    query.set_selected_fields(&fields).map_err(config_error)?;
    query
        .set_page_size(options.page_size.unwrap_or(config.page_size))
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let mut sink = CsvRowSink::new(
        out,
        options.delimiter,
        query.schema().primary_key(),
        config.join_field.clone(),
        options.mutation.is_some(),
    )?;

    let mut reconciler = Reconciler::new(directory, reconcile);
    let report = reconciler.run(&mut query, &mut sink).await?;
    sink.into_inner()?;
    Ok(report)
}

fn config_error(e: ConnectorError) -> CliError {
    CliError::Config(e.to_string())
}

fn store_error(e: ConnectorError) -> CliError {
    if e.is_filter_error() {
        CliError::InvalidFilter(e.to_string())
    } else {
        CliError::Store(e.to_string())
    }
}
