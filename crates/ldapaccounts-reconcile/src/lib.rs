//! # Reconciliation Engine
//!
//! Matches local user records against an LDAP directory by join key (email)
//! and optionally flags the records the directory does not know about.
//!
//! ## Overview
//!
//! - Sequential pagination over the local store, ordered by primary key
//! - One batched directory search per page
//! - Case-insensitive join-key matching; duplicate keys share one status
//! - Optional `suspend` / `delete` / `emailstop` action, applied at most once
//!   per record and committed page by page
//! - Rows streamed to a [`RowSink`]
//!
//! ## Usage
//!
//! ```ignore
//! use ldapaccounts_reconcile::{MutationIntent, ReconcileConfig, Reconciler};
//!
//! let config = ReconcileConfig::default().with_mutation(Some(MutationIntent::Suspend));
//! let mut reconciler = Reconciler::new(directory, config);
//! let mut rows = Vec::new();
//! let report = reconciler.run(&mut query, &mut rows).await?;
//! ```

pub mod engine;
pub mod sink;
pub mod statistics;
pub mod types;

pub use engine::{
    ReconcileConfig, ReconciliationError, ReconciliationResult, Reconciler, RunReport,
};
pub use sink::{ReconciliationRow, RowSink, SinkError};
pub use statistics::RunStatistics;
pub use types::{
    DirectoryStatus, InvalidDirectoryStatus, MutationIntent, RunStatus, UnknownMutationIntent,
};
