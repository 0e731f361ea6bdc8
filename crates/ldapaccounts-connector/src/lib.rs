//! # ldapaccounts connector framework
//!
//! Shared model for reconciling local user records against an LDAP directory.
//!
//! ## Architecture
//!
//! A run pulls pages of local records through a [`query::RecordQuery`], looks
//! up each page's join keys in the directory in one batched search, and merges
//! the two. The external systems sit behind two traits:
//!
//! - [`RecordStore`] - schema introspection, filtered count/select, flag update
//! - [`DirectoryLookup`] - batched join-key search and connection teardown
//!
//! ## Example
//!
//! ```ignore
//! use ldapaccounts_connector::prelude::*;
//!
//! let filter = filter::decode(r#"{"deleted":0,"email":"*example.org"}"#)?;
//!
//! let mut query = RecordQuery::open(store).await?;
//! query.set_filter(filter)?;
//! query.set_selected_fields(&["email", "firstname", "lastname"])?;
//! query.set_page_size(100)?;
//!
//! loop {
//!     let page = query.fetch_page().await?;
//!     if page.is_empty() {
//!         break;
//!     }
//!     // ...
//!     query.advance_page();
//! }
//! ```
//!
//! ## Crate Organization
//!
//! - [`error`] - Error taxonomy shared by every component
//! - [`filter`] - Compact JSON filter codec
//! - [`query`] - Paginated query planner
//! - [`schema`] - Record table schema
//! - [`operation`] - Records and directory search types
//! - [`config`] - Configuration trait and shared settings
//! - [`traits`] - Collaborator traits

pub mod config;
pub mod error;
pub mod filter;
pub mod operation;
pub mod query;
pub mod schema;
pub mod traits;

pub use traits::{DirectoryLookup, RecordStore};

/// Prelude module for convenient imports.
///
/// ```
/// use ldapaccounts_connector::prelude::*;
/// ```
pub mod prelude {
    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult};

    // Traits
    pub use crate::traits::{DirectoryLookup, RecordStore};

    // Filters and queries
    pub use crate::filter::{self, FilterSet, Operator, Predicate};
    pub use crate::query::{QueryArg, QueryPlan, RecordPage, RecordQuery, WhereClause};

    // Records
    pub use crate::operation::{
        AttributeValue, DirectoryEntry, DirectorySearchResult, Record, SearchRequest,
    };
    pub use crate::schema::{ColumnType, RecordSchema};

    // Configuration
    pub use crate::config::{ConnectionSettings, ConnectorConfig, TlsConfig};
}

// Re-export async_trait for collaborator implementors
pub use async_trait::async_trait;
