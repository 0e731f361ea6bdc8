//! # Local User Store
//!
//! PostgreSQL implementation of [`RecordStore`](ldapaccounts_connector::RecordStore)
//! for the local user table: schema introspection, filtered and paged reads,
//! and forward-only flag updates.

pub mod config;
pub mod connector;

pub use config::DatabaseConfig;
pub use connector::DatabaseConnector;
