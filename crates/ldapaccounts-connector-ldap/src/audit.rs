//! Search audit events
//!
//! When auditing is enabled every directory search is recorded with its
//! filter, the requested attributes and either the parsed result or the error.

use serde::Serialize;
use tracing::info;

use ldapaccounts_connector::operation::DirectoryEntry;

/// Log target of audit events.
pub const AUDIT_TARGET: &str = "ldap_audit";

/// Outcome recorded in an audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum AuditOutcome {
    /// Parsed entries serialized as JSON.
    Success(String),
    /// Error message sent back by the directory.
    Error(String),
}

/// One audited directory search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryAuditEvent {
    pub filter: String,
    /// Requested attributes, comma separated.
    pub fields: String,
    pub outcome: AuditOutcome,
}

impl DirectoryAuditEvent {
    /// Record a successful search.
    pub fn success(filter: &str, fields: &[String], entries: &[DirectoryEntry]) -> Self {
        let result = serde_json::to_string(entries).unwrap_or_else(|e| e.to_string());
        Self {
            filter: filter.to_string(),
            fields: fields.join(","),
            outcome: AuditOutcome::Success(result),
        }
    }

    /// Record a failed search.
    pub fn failure(filter: &str, fields: &[String], error: impl Into<String>) -> Self {
        Self {
            filter: filter.to_string(),
            fields: fields.join(","),
            outcome: AuditOutcome::Error(error.into()),
        }
    }

    /// Human readable one-line description.
    pub fn description(&self) -> String {
        let result = match &self.outcome {
            AuditOutcome::Success(json) => json.as_str(),
            AuditOutcome::Error(message) => message.as_str(),
        };
        format!(
            "Filter: {} - Fields: {} - Result: {}",
            self.filter, self.fields, result
        )
    }

    /// Emit the event on the audit target.
    pub fn emit(&self) {
        let status = match self.outcome {
            AuditOutcome::Success(_) => "success",
            AuditOutcome::Error(_) => "error",
        };
        info!(
            target: AUDIT_TARGET,
            filter = %self.filter,
            fields = %self.fields,
            status,
            "{}",
            self.description()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_description() {
        let mut entry = DirectoryEntry::new();
        entry.insert("mail".to_string(), "a@x.org".to_string());

        let event = DirectoryAuditEvent::success(
            "(mail=a@x.org)",
            &["mail".to_string(), "uid".to_string()],
            &[entry],
        );
        assert_eq!(
            event.description(),
            r#"Filter: (mail=a@x.org) - Fields: mail,uid - Result: [{"mail":"a@x.org"}]"#
        );
    }

    #[test]
    fn test_failure_description() {
        let event = DirectoryAuditEvent::failure(
            "(mail=a@x.org)",
            &["mail".to_string()],
            "Error searching in LDAP: Size limit exceeded",
        );
        assert_eq!(
            event.description(),
            "Filter: (mail=a@x.org) - Fields: mail - Result: Error searching in LDAP: Size limit exceeded"
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap()["outcome"]["status"],
            "error"
        );
    }
}
