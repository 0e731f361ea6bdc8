//! ldapaccounts CLI library
//!
//! This library exposes the batch run for integration testing.
//! The binary entry point is in main.rs.

pub mod cli;
pub mod config;
pub mod error;
pub mod output;
pub mod report;
