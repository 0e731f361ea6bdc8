//! # LDAP Directory Client
//!
//! Looks up batches of email addresses in an LDAP directory so local accounts
//! can be matched against it.
//!
//! ## Features
//!
//! - LDAPS by default, plain LDAP when the server URL says so
//! - CA and client certificate setup through `native-tls`
//! - One OR-group search per batch, optionally restricted by a fixed filter
//! - Optional audit events for every search
//!
//! ## Example
//!
//! ```ignore
//! use ldapaccounts_connector::prelude::*;
//! use ldapaccounts_connector_ldap::{LdapConfig, LdapConnector};
//!
//! let config = LdapConfig::new(
//!     "ldap.example.org",
//!     "ou=people,dc=example,dc=org",
//!     "cn=reader,dc=example,dc=org",
//! )
//! .with_password("secret");
//!
//! let mut directory = LdapConnector::new(config)?;
//! let request = SearchRequest::new("mail", vec!["a@example.org".into()]);
//! let found = directory.search(&request).await?;
//! directory.close().await?;
//! ```

pub mod audit;
pub mod config;
pub mod connector;

// Re-exports
pub use audit::DirectoryAuditEvent;
pub use config::LdapConfig;
pub use connector::LdapConnector;
