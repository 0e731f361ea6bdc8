//! Connector error types
//!
//! One taxonomy for the filter codec, the query planner and both collaborators
//! (directory and record store). Directory errors are fatal to a run and are
//! never retried.

use thiserror::Error;

/// Error that can occur while decoding filters, planning queries or talking to
/// the directory and the record store.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Filter errors
    /// The encoded filter is not an object of field to scalar value.
    #[error("invalid filter: {message}")]
    Decode { message: String },

    /// A filter or projection references a field the record schema does not have.
    #[error("unknown field '{field}'")]
    UnknownField { field: String },

    /// A filter value cannot be converted to the column type.
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidFilterValue { field: String, value: String },

    /// Argument outside its accepted range (page size, page number).
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    // Directory errors
    /// Failed to open the directory connection.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Simple bind was rejected.
    #[error("Error Binding to LDAP: {diagnostic}")]
    BindFailed { diagnostic: String },

    /// The directory rejected or failed the search.
    #[error("Error searching in LDAP: {diagnostic}")]
    SearchFailed { diagnostic: String },

    // Configuration errors
    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Record store errors
    /// Database error.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Diagnostic used when the server gives no reason for a failure.
pub const NO_DIAGNOSTIC: &str = "No additional information is available.";

impl ConnectorError {
    /// Check if this error was raised by the directory side.
    pub fn is_directory_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::BindFailed { .. }
                | ConnectorError::SearchFailed { .. }
        )
    }

    /// Check if this error comes from a malformed or unknown filter.
    pub fn is_filter_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::Decode { .. }
                | ConnectorError::UnknownField { .. }
                | ConnectorError::InvalidFilterValue { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::Decode { .. } => "DECODE_ERROR",
            ConnectorError::UnknownField { .. } => "UNKNOWN_FIELD",
            ConnectorError::InvalidFilterValue { .. } => "INVALID_FILTER_VALUE",
            ConnectorError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::BindFailed { .. } => "BIND_FAILED",
            ConnectorError::SearchFailed { .. } => "SEARCH_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::Database { .. } => "DATABASE_ERROR",
        }
    }

    // Convenience constructors

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        ConnectorError::Decode {
            message: message.into(),
        }
    }

    /// Create an unknown field error.
    pub fn unknown_field(field: impl Into<String>) -> Self {
        ConnectorError::UnknownField {
            field: field.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ConnectorError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a bind error, falling back to the generic diagnostic when the
    /// server sent none.
    pub fn bind_failed(diagnostic: impl Into<String>) -> Self {
        ConnectorError::BindFailed {
            diagnostic: non_empty_diagnostic(diagnostic.into()),
        }
    }

    /// Create a search error, falling back to the generic diagnostic when the
    /// server sent none.
    pub fn search_failed(diagnostic: impl Into<String>) -> Self {
        ConnectorError::SearchFailed {
            diagnostic: non_empty_diagnostic(diagnostic.into()),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        ConnectorError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source.
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

fn non_empty_diagnostic(diagnostic: String) -> String {
    if diagnostic.trim().is_empty() {
        NO_DIAGNOSTIC.to_string()
    } else {
        diagnostic
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
