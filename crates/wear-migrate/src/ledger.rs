//! Ledger and audit log records.
//!
//! Both are ordinary records persisted through the adapter: the ledger holds
//! one row per applied version, the log one row per migration action.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use wear_orm::Record;

/// An applied migration version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Record)]
#[table(name = "mw_schema_migration")]
pub struct SchemaMigration {
    /// Applied version.
    #[column(primary_key)]
    pub version: String,
    /// When it was applied.
    pub created: DateTime<Utc>,
}

impl SchemaMigration {
    /// Ledger row for `version` applied now.
    #[must_use]
    pub fn now(version: &str) -> Self {
        Self {
            version: version.to_string(),
            created: Utc::now(),
        }
    }
}

/// Kind of a logged migration action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Ledger and log tables created.
    Init,
    /// Pending versions applied.
    Update,
    /// A version rolled back.
    Rollback,
    /// Ledger cleared.
    Reset,
}

impl Action {
    /// Stored name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Update => "update",
            Self::Rollback => "rollback",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the migration audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Record)]
#[table(name = "mw_migration_log")]
pub struct MigrationLog {
    pub id: i64,
    pub action: String,
    pub message: String,
    pub version: String,
    pub success: bool,
    pub created: DateTime<Utc>,
}

impl MigrationLog {
    /// A successful log entry created now.
    #[must_use]
    pub fn new(action: Action, message: impl Into<String>, version: &str) -> Self {
        Self {
            id: 0,
            action: action.to_string(),
            message: message.into(),
            version: version.to_string(),
            success: true,
            created: Utc::now(),
        }
    }
}

impl fmt::Display for MigrationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<8} {}",
            self.created.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            self.message
        )?;
        if !self.success {
            f.write_str(" (failed)")?;
        }
        Ok(())
    }
}
