//! Forward-only SQL schema migrations with rollback and an audit log.
//!
//! `wear-migrate` applies plain SQL migrations through `wear-orm`:
//! - Versions are timestamps (`2024-05-01:10:00:00`) or the default schema
//!   version `0000-00-00:00:00:00`, which only runs on request
//! - Applied versions are recorded in the `mw_schema_migration` ledger
//! - Every action is appended to the `mw_migration_log` table
//! - Each version applies or rolls back in one transaction with its ledger row
//!
//! # Example
//!
//! ```rust,ignore
//! use wear_migrate::{Migrator, Registry};
//!
//! let registry = Registry::from_dir("schema")?;
//! let migrator = Migrator::new(pool, registry);
//!
//! migrator.init_schema(false).await?;
//! let applied = migrator.update_schema(false).await?;
//!
//! // undo the newest version
//! migrator.rollback_latest().await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the ledger and log tables
//! wear-migrate init
//!
//! # Apply pending migrations
//! wear-migrate up
//!
//! # Create an empty migration pair
//! wear-migrate new-migration
//!
//! # Roll back the latest (or a given) version
//! wear-migrate rollback [version]
//! ```

pub mod config;
mod engine;
mod error;
pub mod ledger;
pub mod registry;

pub use config::{parse_env, read_env_file, ConnectVals};
pub use engine::{Migrator, Status};
pub use error::{MigrateError, Result};
pub use ledger::{Action, MigrationLog, SchemaMigration};
pub use registry::{
    canonical_version, new_migration, Migration, Registry, DEFAULT_VERSION, VERSION_TIME_FORMAT,
};
