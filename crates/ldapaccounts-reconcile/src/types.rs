//! Reconciliation types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Action applied to local records absent from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationIntent {
    Suspend,
    Delete,
    EmailStop,
}

impl MutationIntent {
    /// Flag column set by this action.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Suspend => "suspended",
            Self::Delete => "deleted",
            Self::EmailStop => "emailstop",
        }
    }

    /// Name accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Delete => "delete",
            Self::EmailStop => "emailstop",
        }
    }
}

impl fmt::Display for MutationIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an action name that is not one of `suspend`, `delete`, `emailstop`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown action '{0}'")]
pub struct UnknownMutationIntent(pub String);

impl FromStr for MutationIntent {
    type Err = UnknownMutationIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "suspend" => Ok(Self::Suspend),
            "delete" => Ok(Self::Delete),
            "emailstop" => Ok(Self::EmailStop),
            _ => Err(UnknownMutationIntent(s.to_string())),
        }
    }
}

/// Whether a record's join key was found in the directory.
///
/// Serialized as `0`/`1` like the CSV column. Deserializing also accepts
/// `"absent"`/`"present"` for configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "DirectoryStatusValue")]
pub enum DirectoryStatus {
    Absent = 0,
    Present = 1,
}

/// Accepted serialized forms of a [`DirectoryStatus`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DirectoryStatusValue {
    Number(u64),
    Name(String),
}

/// Error for a directory status other than 0, 1, absent or present.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid directory status '{0}', expected 0, 1, absent or present")]
pub struct InvalidDirectoryStatus(pub String);

impl TryFrom<DirectoryStatusValue> for DirectoryStatus {
    type Error = InvalidDirectoryStatus;

    fn try_from(value: DirectoryStatusValue) -> Result<Self, Self::Error> {
        match value {
            DirectoryStatusValue::Number(0) => Ok(Self::Absent),
            DirectoryStatusValue::Number(1) => Ok(Self::Present),
            DirectoryStatusValue::Number(n) => Err(InvalidDirectoryStatus(n.to_string())),
            DirectoryStatusValue::Name(name) => match name.trim().to_lowercase().as_str() {
                "0" | "absent" => Ok(Self::Absent),
                "1" | "present" => Ok(Self::Present),
                _ => Err(InvalidDirectoryStatus(name)),
            },
        }
    }
}

impl From<DirectoryStatus> for u8 {
    fn from(status: DirectoryStatus) -> Self {
        status.as_u8()
    }
}

impl DirectoryStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

impl From<bool> for DirectoryStatus {
    fn from(found: bool) -> Self {
        if found {
            Self::Present
        } else {
            Self::Absent
        }
    }
}

impl fmt::Display for DirectoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Lifecycle of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Whether the run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
