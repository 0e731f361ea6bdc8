//! LDAP directory client
//!
//! Implements [`DirectoryLookup`] over `ldap3`. The connection is opened and
//! bound lazily on the first search that has something to look up, and torn
//! down with [`DirectoryLookup::close`].

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use native_tls::{Certificate, Identity, TlsConnector};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use ldapaccounts_connector::config::ConnectorConfig;
use ldapaccounts_connector::error::{ConnectorError, ConnectorResult};
use ldapaccounts_connector::operation::{DirectoryEntry, DirectorySearchResult, SearchRequest};
use ldapaccounts_connector::traits::DirectoryLookup;

use crate::audit::DirectoryAuditEvent;
use crate::config::LdapConfig;

/// Result code of a rejected simple bind.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Lifecycle of the directory connection.
enum ConnectionState {
    Disconnected,
    Connected(Ldap),
    Bound(Ldap),
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::Bound(_) => "bound",
        }
    }
}

/// LDAP client answering batched join-key lookups.
pub struct LdapConnector {
    config: LdapConfig,
    state: ConnectionState,
    /// Entry count of the last search.
    last_count: usize,
}

impl LdapConnector {
    /// Create a new client. No connection is opened yet.
    pub fn new(config: LdapConfig) -> ConnectorResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: ConnectionState::Disconnected,
            last_count: 0,
        })
    }

    /// Configuration of this client.
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Whether a bound connection is open.
    pub fn is_bound(&self) -> bool {
        matches!(self.state, ConnectionState::Bound(_))
    }

    /// Number of entries returned by the last search.
    pub fn last_count(&self) -> usize {
        self.last_count
    }

    /// Open the connection, applying certificate options first.
    ///
    /// ldap3 always speaks protocol version 3 and never chases referrals.
    #[instrument(skip(self), fields(state = self.state.name()))]
    pub async fn connect(&mut self) -> ConnectorResult<()> {
        if !matches!(self.state, ConnectionState::Disconnected) {
            return Ok(());
        }

        let url = self.config.url();
        debug!(url = %url, "Connecting to LDAP server");

        let mut settings =
            LdapConnSettings::new().set_conn_timeout(self.config.connection.connection_timeout());
        if let Some(connector) = self.tls_connector()? {
            settings = settings.set_connector(connector);
        }

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("could not connect to server at {url}"),
                    e,
                )
            })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        self.state = ConnectionState::Connected(ldap);
        Ok(())
    }

    /// Simple bind with the configured credentials.
    #[instrument(skip(self), fields(bind_dn = %self.config.bind_dn))]
    pub async fn bind(&mut self) -> ConnectorResult<()> {
        let mut ldap = match std::mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Disconnected => {
                return Err(ConnectorError::connection_failed(
                    "bind attempted without a connection",
                ))
            }
            ConnectionState::Bound(ldap) => {
                self.state = ConnectionState::Bound(ldap);
                return Ok(());
            }
            ConnectionState::Connected(ldap) => ldap,
        };

        let password = self.config.bind_password.as_deref().unwrap_or("");
        let result = ldap
            .simple_bind(&self.config.bind_dn, password)
            .await
            .map_err(|e| ConnectorError::bind_failed(e.to_string()))?;

        if result.rc != 0 {
            let diagnostic = if result.text.trim().is_empty() && result.rc == RC_INVALID_CREDENTIALS
            {
                "invalid credentials".to_string()
            } else {
                result.text
            };
            debug!(rc = result.rc, "LDAP bind rejected");
            return Err(ConnectorError::bind_failed(diagnostic));
        }

        info!(server = %self.config.server, "LDAP connection established successfully");
        self.state = ConnectionState::Bound(ldap);
        Ok(())
    }

    async fn ensure_bound(&mut self) -> ConnectorResult<&mut Ldap> {
        if !self.is_bound() {
            self.connect().await?;
            self.bind().await?;
        }
        match &mut self.state {
            ConnectionState::Bound(ldap) => Ok(ldap),
            _ => Err(ConnectorError::connection_failed("connection is not bound")),
        }
    }

    /// Build the TLS connector when certificate files are configured.
    ///
    /// A client certificate whose file does not exist is skipped. The CA file
    /// must be readable PEM.
    fn tls_connector(&self) -> ConnectorResult<Option<TlsConnector>> {
        let tls = &self.config.tls;
        if !tls.has_certificates() {
            return Ok(None);
        }

        let mut builder = TlsConnector::builder();

        if let Some(ca_path) = &tls.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("could not read CA certificate {ca_path}"),
                    e,
                )
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                ConnectorError::connection_failed_with_source(
                    format!("invalid CA certificate {ca_path}"),
                    e,
                )
            })?;
            builder.add_root_certificate(certificate);
        }

        if let Some(cert_path) = &tls.client_cert_path {
            if Path::new(cert_path).exists() {
                builder.identity(self.client_identity(cert_path)?);
            } else {
                warn!(path = %cert_path, "Client certificate not found, connecting without it");
            }
        }

        builder.build().map(Some).map_err(|e| {
            ConnectorError::connection_failed_with_source("could not set up TLS", e)
        })
    }

    fn client_identity(&self, cert_path: &str) -> ConnectorResult<Identity> {
        let key_path = self.config.tls.client_key_path.as_deref().ok_or_else(|| {
            ConnectorError::invalid_configuration("client certificate requires a key file")
        })?;

        let read = |path: &str| {
            std::fs::read(path).map_err(|e| {
                ConnectorError::connection_failed_with_source(format!("could not read {path}"), e)
            })
        };
        let cert = read(cert_path)?;
        let key = read(key_path)?;

        Identity::from_pkcs8(&cert, &key).map_err(|e| {
            ConnectorError::connection_failed_with_source(
                format!("invalid client certificate {cert_path}"),
                e,
            )
        })
    }

    /// Audit event for a finished search, or `None` with auditing off.
    fn audit_event(
        &self,
        filter: &str,
        fields: &[String],
        outcome: Result<&[DirectoryEntry], &ConnectorError>,
    ) -> Option<DirectoryAuditEvent> {
        if !self.config.logging {
            return None;
        }
        Some(match outcome {
            Ok(entries) => DirectoryAuditEvent::success(filter, fields, entries),
            Err(e) => DirectoryAuditEvent::failure(filter, fields, e.to_string()),
        })
    }
}

#[async_trait]
impl DirectoryLookup for LdapConnector {
    #[instrument(skip(self, request), fields(join_field = %request.join_field, values = request.values.len()))]
    async fn search(&mut self, request: &SearchRequest) -> ConnectorResult<DirectorySearchResult> {
        let values = lookup_values(&request.values);
        if values.is_empty() {
            debug!("Nothing to look up, skipping LDAP search");
            self.last_count = 0;
            return Ok(DirectorySearchResult::empty());
        }

        let filter = build_filter(
            &request.join_field,
            &values,
            request.query_prefix.as_deref(),
        );
        let fields = result_fields(&request.result_fields, &request.join_field);
        let base_dn = self.config.base_dn.clone();

        let ldap = self.ensure_bound().await?;

        debug!(filter = %filter, base_dn = %base_dn, "Searching LDAP");

        let outcome = match ldap
            .search(&base_dn, Scope::Subtree, &filter, fields.clone())
            .await
        {
            Err(e) => Err(ConnectorError::search_failed(e.to_string())),
            Ok(result) if result.1.rc != 0 => Err(ConnectorError::search_failed(result.1.text)),
            Ok(result) => Ok(result.0),
        };

        let entries: ConnectorResult<Vec<DirectoryEntry>> = outcome.map(|raw| {
            raw.into_iter()
                .map(SearchEntry::construct)
                .map(parse_entry)
                .collect()
        });

        if let Some(event) = self.audit_event(&filter, &fields, entries.as_deref()) {
            event.emit();
        }
        let entries = entries?;
        self.last_count = entries.len();

        info!(found = entries.len(), "LDAP search completed");
        Ok(DirectorySearchResult::from_entries(entries))
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        match std::mem::replace(&mut self.state, ConnectionState::Disconnected) {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected(mut ldap) | ConnectionState::Bound(mut ldap) => {
                if let Err(e) = ldap.unbind().await {
                    warn!(error = %e, "Error during LDAP unbind");
                }
                debug!("LDAP connection closed");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LdapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConnector")
            .field("config", &self.config.redacted())
            .field("state", &self.state.name())
            .finish()
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_ldap_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Trimmed, non-empty, deduplicated values in first-seen order.
fn lookup_values(values: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Build `(&(prefix)(|(field=v1)(field=v2)...))`.
///
/// A single value needs no OR group and no prefix needs no AND group.
pub fn build_filter(field: &str, values: &[String], prefix: Option<&str>) -> String {
    let terms: String = values
        .iter()
        .map(|v| format!("({field}={})", escape_ldap_value(v)))
        .collect();
    let lookup = if values.len() == 1 {
        terms
    } else {
        format!("(|{terms})")
    };

    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) if prefix.starts_with('(') => format!("(&{prefix}{lookup})"),
        Some(prefix) => format!("(&({prefix}){lookup})"),
        None => lookup,
    }
}

/// Trimmed non-empty attribute names; the join field when none remain.
fn result_fields(fields: &[String], join_field: &str) -> Vec<String> {
    let fields: Vec<String> = fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        vec![join_field.to_string()]
    } else {
        fields
    }
}

/// Keep the first value of every text attribute, keyed by lower-cased name.
pub fn parse_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut parsed = DirectoryEntry::new();
    parsed.insert("dn".to_string(), entry.dn);
    for (name, values) in entry.attrs {
        if let Some(first) = values.into_iter().next() {
            parsed.insert(name.to_lowercase(), first);
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOutcome;
    use ldapaccounts_connector::config::TlsConfig;
    use std::collections::HashMap;
    use std::io::Write;

    fn values(list: &[&str]) -> Vec<String> {
        list.iter().map(|v| v.to_string()).collect()
    }

    fn test_config() -> LdapConfig {
        LdapConfig::new(
            "ldap://127.0.0.1:1",
            "ou=people,dc=example,dc=org",
            "cn=reader,dc=example,dc=org",
        )
        .with_password("secret")
    }

    #[test]
    fn test_build_filter_single_value() {
        assert_eq!(
            build_filter("mail", &values(&["a@x.org"]), None),
            "(mail=a@x.org)"
        );
    }

    #[test]
    fn test_build_filter_or_group() {
        assert_eq!(
            build_filter("mail", &values(&["a@x.org", "b@x.org"]), None),
            "(|(mail=a@x.org)(mail=b@x.org))"
        );
    }

    #[test]
    fn test_build_filter_with_prefix() {
        assert_eq!(
            build_filter(
                "mail",
                &values(&["a@x.org", "b@x.org"]),
                Some("objectClass=person")
            ),
            "(&(objectClass=person)(|(mail=a@x.org)(mail=b@x.org)))"
        );
        assert_eq!(
            build_filter("mail", &values(&["a@x.org"]), Some("(!(status=gone))")),
            "(&(!(status=gone))(mail=a@x.org))"
        );
        assert_eq!(
            build_filter("mail", &values(&["a@x.org"]), Some("  ")),
            "(mail=a@x.org)"
        );
    }

    #[test]
    fn test_build_filter_escapes_values() {
        assert_eq!(
            build_filter("mail", &values(&["*)(uid=*"]), None),
            "(mail=\\2a\\29\\28uid=\\2a)"
        );
    }

    #[test]
    fn test_escape_ldap_value() {
        assert_eq!(escape_ldap_value("simple"), "simple");
        assert_eq!(escape_ldap_value("a*b"), "a\\2ab");
        assert_eq!(escape_ldap_value("(x)"), "\\28x\\29");
        assert_eq!(escape_ldap_value("back\\slash"), "back\\5cslash");
        assert_eq!(escape_ldap_value("nul\0"), "nul\\00");
    }

    #[test]
    fn test_lookup_values_dedup_and_skip_empty() {
        assert_eq!(
            lookup_values(&values(&["a@x.org", "", " A@x.org ", "b@x.org", "  "])),
            values(&["a@x.org", "b@x.org"])
        );
    }

    #[test]
    fn test_result_fields() {
        assert_eq!(
            result_fields(&values(&[" mail ", "", "uid"]), "mail"),
            values(&["mail", "uid"])
        );
        assert_eq!(result_fields(&[], "mail"), values(&["mail"]));
    }

    #[test]
    fn test_parse_entry_keeps_first_value() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "mail".to_string(),
            vec!["a@x.org".to_string(), "b@x.org".to_string()],
        );
        attrs.insert("givenName".to_string(), vec!["Ada".to_string()]);
        attrs.insert("description".to_string(), Vec::new());
        let entry = SearchEntry {
            dn: "uid=ada,ou=people,dc=x,dc=org".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        };

        let parsed = parse_entry(entry);
        assert_eq!(parsed.get("mail").map(String::as_str), Some("a@x.org"));
        assert_eq!(parsed.get("givenname").map(String::as_str), Some("Ada"));
        assert_eq!(
            parsed.get("dn").map(String::as_str),
            Some("uid=ada,ou=people,dc=x,dc=org")
        );
        assert!(!parsed.contains_key("description"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = LdapConfig {
            base_dn: String::new(),
            ..test_config()
        };
        assert!(LdapConnector::new(config).is_err());
    }

    #[tokio::test]
    async fn test_empty_lookup_sends_no_query() {
        let mut connector = LdapConnector::new(test_config()).unwrap();
        let request = SearchRequest::new("mail", values(&["", "  "]));

        let result = connector.search(&request).await.unwrap();
        assert_eq!(result, DirectorySearchResult::empty());
        assert!(!connector.is_bound());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut connector = LdapConnector::new(test_config()).unwrap();
        connector.close().await.unwrap();
        connector.close().await.unwrap();
        assert!(!connector.is_bound());
    }

    #[test]
    fn test_audit_event_disabled_by_default() {
        let connector = LdapConnector::new(test_config()).unwrap();
        let fields = values(&["mail"]);
        assert!(connector
            .audit_event("(mail=a@x.org)", &fields, Ok(&[][..]))
            .is_none());
        let err = ConnectorError::search_failed("Busy");
        assert!(connector
            .audit_event("(mail=a@x.org)", &fields, Err(&err))
            .is_none());
    }

    #[test]
    fn test_audit_event_when_enabled() {
        let connector = LdapConnector::new(test_config().with_logging(true)).unwrap();
        let fields = values(&["mail"]);

        let mut entry = DirectoryEntry::new();
        entry.insert("mail".to_string(), "a@x.org".to_string());
        let event = connector
            .audit_event("(mail=a@x.org)", &fields, Ok(std::slice::from_ref(&entry)))
            .unwrap();
        assert_eq!(
            event.description(),
            r#"Filter: (mail=a@x.org) - Fields: mail - Result: [{"mail":"a@x.org"}]"#
        );

        let err = ConnectorError::search_failed("Busy");
        let event = connector
            .audit_event("(mail=a@x.org)", &fields, Err(&err))
            .unwrap();
        assert_eq!(
            event.outcome,
            AuditOutcome::Error("Error searching in LDAP: Busy".to_string())
        );
    }

    #[tokio::test]
    async fn test_bind_without_connection_fails() {
        let mut connector = LdapConnector::new(test_config()).unwrap();
        let err = connector.bind().await.unwrap_err();
        assert!(err.is_directory_error());
    }

    #[test]
    fn test_tls_connector_without_certificates() {
        let connector = LdapConnector::new(test_config()).unwrap();
        assert!(connector.tls_connector().unwrap().is_none());
    }

    #[test]
    fn test_tls_connector_missing_ca_file() {
        let config = test_config()
            .with_tls(TlsConfig::default().with_ca_cert("/nonexistent/ldapaccounts-ca.pem"));
        let connector = LdapConnector::new(config).unwrap();

        let err = connector.tls_connector().unwrap_err();
        assert!(matches!(err, ConnectorError::ConnectionFailed { .. }));
    }

    #[test]
    fn test_tls_connector_invalid_ca_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let config = test_config().with_tls(
            TlsConfig::default().with_ca_cert(file.path().to_string_lossy().to_string()),
        );
        let connector = LdapConnector::new(config).unwrap();

        assert!(connector.tls_connector().is_err());
    }

    #[test]
    fn test_tls_connector_skips_missing_client_cert() {
        let config = test_config().with_tls(TlsConfig::default().with_client_cert(
            "/nonexistent/ldapaccounts-client.pem",
            Some("/nonexistent/ldapaccounts-client.key".to_string()),
        ));
        let connector = LdapConnector::new(config).unwrap();

        assert!(connector.tls_connector().unwrap().is_some());
    }
}
