//! Logging Standards and Conventions
//!
//! Every crate in the workspace logs through `tracing` with structured
//! fields. The names below keep those fields consistent so a revision can be
//! followed from the builder through the store to the CLI.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Integrity or consistency failures | Chain verification failed, unit-of-work second write failed |
//! | WARN  | Recoverable issues | Revision conflict, retry scheduled |
//! | INFO  | Significant state changes | Revision appended, object repaired |
//! | DEBUG | Detailed operation flow | Store reads, revision built |
//! | TRACE | Full payloads | Serialized snapshots |
//!
//! # Examples
//!
//! ```ignore
//! use consent_core::logging::operations;
//! use tracing::info;
//!
//! info!(
//!     operation = operations::REVISION_UPDATE,
//!     object_id = %revision.object_id,
//!     revision_id = %revision.id,
//!     "Revision appended"
//! );
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RevisionError, RevisionResult};

/// Log level enumeration matching tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parse from configuration text
    pub fn parse(s: &str) -> RevisionResult<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(RevisionError::Config(format!("Invalid log level: '{}'", other))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation names used in the `operation` field
pub mod operations {
    pub const REVISION_CREATE: &str = "revision_create";
    pub const REVISION_UPDATE: &str = "revision_update";
    pub const RECREATE: &str = "recreate";
    pub const STORE_ADD: &str = "store_add";
    pub const STORE_APPEND: &str = "store_append";
    pub const STORE_LINK: &str = "store_link";
    pub const STORE_READ: &str = "store_read";
    pub const OBJECT_WRITE: &str = "object_write";
    pub const OBJECT_DELETE: &str = "object_delete";
    pub const VERIFY: &str = "verify";
    pub const REPAIR: &str = "repair";
    pub const RECONCILE: &str = "reconcile";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::parse("INFO").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::parse("warning").unwrap(), LogLevel::Warn);
        assert!(LogLevel::parse("invalid").is_err());
    }
}
