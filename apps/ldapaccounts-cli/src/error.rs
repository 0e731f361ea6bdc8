//! CLI error types and exit codes

use thiserror::Error;

use ldapaccounts_reconcile::ReconciliationError;

use crate::config::ConfigError;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: Unknown or bad option
/// - 2: Invalid filter
/// - 3: Invalid delimiter
/// - 4: Invalid action
/// - 5: LDAP error
/// - 6: Database, configuration or output error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid delimiter '{0}'. Use one of: ; , | ~ : tab")]
    InvalidDelimiter(String),

    #[error("Invalid action '{0}'. Use one of: suspend, delete, emailstop")]
    InvalidAction(String),

    #[error("{0}")]
    Directory(String),

    #[error("Database error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 1,
            CliError::InvalidFilter(_) => 2,
            CliError::InvalidDelimiter(_) => 3,
            CliError::InvalidAction(_) => 4,
            CliError::Directory(_) => 5,
            CliError::Store(_) | CliError::Config(_) | CliError::Output(_) => 6,
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Usage(_) => Some("Run 'ldapaccounts --help' for the list of options."),
            CliError::InvalidFilter(_) => {
                Some(r#"Filters are JSON objects, e.g. '{"deleted":0,"email":"*@example.org"}'."#)
            }
            CliError::Config(_) => {
                Some("Set the LDAPACCOUNTS_* variables and DATABASE_URL, or add them to .env.")
            }
            _ => None,
        }
    }
}

impl From<ReconciliationError> for CliError {
    fn from(e: ReconciliationError) -> Self {
        match e {
            ReconciliationError::Directory(e) => CliError::Directory(e.to_string()),
            ReconciliationError::Store(e) if e.is_filter_error() => {
                CliError::InvalidFilter(e.to_string())
            }
            ReconciliationError::Store(e) => CliError::Store(e.to_string()),
            ReconciliationError::Sink(e) => CliError::Output(e.to_string()),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<csv::Error> for CliError {
    fn from(e: csv::Error) -> Self {
        CliError::Output(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Output(format!("I/O error: {}", e))
    }
}
