//! Error types for the migration system.

use wear_orm::OrmError;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Adapter error outside a migration transaction (ledger reads, log writes).
    #[error("ORM error: {0}")]
    Orm(#[from] OrmError),

    /// IO error (reading/writing migration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The version was registered twice.
    #[error("migration ({0}) has already been registered")]
    DuplicateVersion(String),

    /// A migration file name is neither a timestamp version nor the default version.
    #[error("unrecognized version ({name}) format: {message}")]
    InvalidVersion {
        /// Offending version name.
        name: String,
        /// Parse error.
        message: String,
    },

    /// No migration is registered under the version.
    #[error("migration ({0}) not found")]
    MigrationNotFound(String),

    /// The migration has no forward SQL.
    #[error("migration ({0}): up sql not defined")]
    MissingUpSql(String),

    /// The migration has no reverse SQL.
    #[error("migration ({0}): down sql not found")]
    MissingDownSql(String),

    /// Forward SQL or its ledger insert failed; the transaction was rolled back.
    #[error("fail update to version ({version}): {source}")]
    Apply {
        /// Version being applied.
        version: String,
        /// Underlying error.
        #[source]
        source: OrmError,
    },

    /// Reverse SQL or its ledger delete failed; the transaction was rolled back.
    #[error("fail rollback version ({version}): {source}")]
    Rollback {
        /// Version being rolled back.
        version: String,
        /// Underlying error.
        #[source]
        source: OrmError,
    },

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_errors_surface_through_orm() {
        let err: MigrateError = OrmError::from(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, MigrateError::Orm(OrmError::Database(_))));
        assert!(err.to_string().starts_with("ORM error: "));
    }

    #[test]
    fn test_apply_keeps_its_source() {
        let err = MigrateError::Apply {
            version: "2024-01-10:09:00:00".into(),
            source: OrmError::Validation("bad".into()),
        };
        assert!(err.to_string().starts_with("fail update to version (2024-01-10:09:00:00): "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
