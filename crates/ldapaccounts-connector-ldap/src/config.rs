//! LDAP directory configuration
//!
//! Connection, bind and lookup settings of the directory the local accounts
//! are checked against.

use serde::{Deserialize, Serialize};
use ldapaccounts_connector::config::{ConnectionSettings, ConnectorConfig, TlsConfig};
use ldapaccounts_connector::error::{ConnectorError, ConnectorResult};

/// Configuration for the LDAP directory client.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Server host name or URL. A value without a scheme is reached over `ldaps://`.
    pub server: String,

    /// Server port, appended unless `server` already carries one.
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Base DN of every search (e.g., "ou=people,dc=example,dc=com").
    pub base_dn: String,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Certificate files.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Directory attribute holding the email address.
    #[serde(default = "default_mail_field")]
    pub mail_field: String,

    /// Filter fragment every looked-up entry must also match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Emit an audit event for every search.
    #[serde(default)]
    pub logging: bool,

    /// Connection settings (timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("tls", &self.tls)
            .field("mail_field", &self.mail_field)
            .field("query", &self.query)
            .field("logging", &self.logging)
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    636
}

fn default_mail_field() -> String {
    "mail".to_string()
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(
        server: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port: default_ldap_port(),
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            tls: TlsConfig::default(),
            mail_field: default_mail_field(),
            query: None,
            logging: false,
            connection: ConnectionSettings::default(),
        }
    }

    /// Set bind password. An empty password binds without one.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.bind_password = (!password.is_empty()).then_some(password);
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the certificate files.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the email attribute.
    pub fn with_mail_field(mut self, field: impl Into<String>) -> Self {
        self.mail_field = field.into();
        self
    }

    /// Set the fixed query prefix. Blank values clear it.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.trim().is_empty()).then_some(query);
        self
    }

    /// Enable or disable search auditing.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Set the connection settings.
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let server = self.server.trim().trim_end_matches('/');
        let url = if server.contains("://") {
            server.to_string()
        } else {
            format!("ldaps://{server}")
        };
        if has_explicit_port(&url) {
            url
        } else {
            format!("{url}:{}", self.port)
        }
    }
}

fn has_explicit_port(url: &str) -> bool {
    let authority = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!host.starts_with('[') || host.ends_with(']'))
        }
        None => false,
    }
}

impl ConnectorConfig for LdapConfig {
    fn connector_type() -> &'static str {
        "ldap"
    }

    fn validate(&self) -> ConnectorResult<()> {
        if self.server.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "server is required",
            ));
        }
        if self.port == 0 {
            return Err(ConnectorError::invalid_configuration(
                "port must be between 1 and 65535",
            ));
        }
        if self.base_dn.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "base_dn is required",
            ));
        }
        if self.mail_field.trim().is_empty() {
            return Err(ConnectorError::invalid_configuration(
                "mail_field is required",
            ));
        }
        if self.tls.client_key_path.is_some() && self.tls.client_cert_path.is_none() {
            return Err(ConnectorError::invalid_configuration(
                "client key configured without a client certificate",
            ));
        }
        Ok(())
    }

    fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}
