//! Connector configuration types
//!
//! Base trait and the connection/TLS settings shared by the directory and
//! record store configurations.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ConnectorResult;

/// Trait for connector-specific configuration.
pub trait ConnectorConfig: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Short name of the connector, used in log fields.
    fn connector_type() -> &'static str;

    /// Validate the configuration.
    ///
    /// Returns an error if the configuration is invalid.
    fn validate(&self) -> ConnectorResult<()>;

    /// Create a redacted version of this config (for logging/display).
    fn redacted(&self) -> Self;
}

/// Connection settings shared across connector types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Connection pool size (record store only).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    2
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

impl ConnectionSettings {
    /// Create new connection settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Certificate files applied before the directory connection is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to CA certificate file (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,

    /// Path to client certificate file (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<String>,

    /// Path to client key file (PKCS#8 PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Set the CA certificate path.
    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Set the client certificate and key paths.
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<String>,
        key_path: Option<String>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = key_path;
        self
    }

    /// Whether any certificate option is configured.
    pub fn has_certificates(&self) -> bool {
        self.ca_cert_path.is_some() || self.client_cert_path.is_some()
    }
}
