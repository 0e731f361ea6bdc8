//! Environment configuration
//!
//! Everything the batch run needs besides its command-line options. Empty
//! variables count as unset.

use ldapaccounts_connector::config::{ConnectionSettings, TlsConfig};
use ldapaccounts_connector_database::DatabaseConfig;
use ldapaccounts_connector_ldap::LdapConfig;

/// Default number of records per page for batch runs.
pub const DEFAULT_BATCH_PAGE_SIZE: u64 = 100;

/// Configuration of a batch run.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub ldap: LdapConfig,
    pub database: DatabaseConfig,
    /// Local column holding the email address.
    pub join_field: String,
    pub page_size: u64,
}

impl ReportConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let var = |key: &str| reader(key).ok().filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| var(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));

        let port = match var("LDAPACCOUNTS_LDAP_PORT") {
            Some(port) => port.trim().parse::<u16>().map_err(|e| {
                ConfigError::InvalidValue("LDAPACCOUNTS_LDAP_PORT".into(), e.to_string())
            })?,
            None => 636,
        };

        let timeout_secs = match var("LDAPACCOUNTS_LDAP_TIMEOUT_SECS") {
            Some(secs) => secs.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("LDAPACCOUNTS_LDAP_TIMEOUT_SECS".into(), e.to_string())
            })?,
            None => 30,
        };

        let logging = var("LDAPACCOUNTS_LDAP_LOGGING").is_some_and(|v| parse_flag(&v));

        let mut tls = TlsConfig::default();
        if let Some(ca) = var("LDAPACCOUNTS_LDAP_CACERT") {
            tls = tls.with_ca_cert(ca);
        }
        if let Some(cert) = var("LDAPACCOUNTS_LDAP_CERT") {
            tls = tls.with_client_cert(cert, var("LDAPACCOUNTS_LDAP_KEY"));
        }

        let mut ldap = LdapConfig::new(
            required("LDAPACCOUNTS_LDAP_SERVER")?,
            required("LDAPACCOUNTS_LDAP_BASEDN")?,
            required("LDAPACCOUNTS_LDAP_USER")?,
        )
        .with_password(var("LDAPACCOUNTS_LDAP_PASS").unwrap_or_default())
        .with_port(port)
        .with_tls(tls)
        .with_logging(logging)
        .with_connection(ConnectionSettings::new().with_connection_timeout(timeout_secs));
        if let Some(field) = var("LDAPACCOUNTS_LDAP_MAILFIELD") {
            ldap = ldap.with_mail_field(field.trim());
        }
        if let Some(query) = var("LDAPACCOUNTS_LDAP_QUERY") {
            ldap = ldap.with_query(query);
        }

        let mut database = DatabaseConfig::new(required("DATABASE_URL")?);
        if let Some(table) = var("LDAPACCOUNTS_USER_TABLE") {
            database = database.with_users_table(table.trim());
        }

        let join_field = var("LDAPACCOUNTS_JOIN_FIELD")
            .map(|f| f.trim().to_string())
            .unwrap_or_else(|| "email".to_string());

        let page_size = match var("LDAPACCOUNTS_PAGE_SIZE") {
            Some(size) => match size.trim().parse::<u64>() {
                Ok(size) if size >= 1 => size,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "LDAPACCOUNTS_PAGE_SIZE".into(),
                        format!("'{size}' is not a positive integer"),
                    ))
                }
            },
            None => DEFAULT_BATCH_PAGE_SIZE,
        };

        Ok(Self {
            ldap,
            database,
            join_field,
            page_size,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
