//! Migration engine.
//!
//! This module applies and rolls back registered migrations against a
//! database, recording applied versions in the ledger and every action in the
//! audit log. Each forward or reverse step runs inside one transaction
//! together with its ledger change.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};
use wear_orm::{Adapter, Connection, Criteria, Order, OrmError, Transactional, TxHandle, Q};

use crate::error::{MigrateError, Result};
use crate::ledger::{Action, MigrationLog, SchemaMigration};
use crate::registry::{canonical_version, Registry, DEFAULT_ALIAS};

/// Entries shown by [`Migrator::status`].
const STATUS_LIMIT: u64 = 10;

/// Ledger change committed together with a migration's SQL.
#[derive(Debug, Clone, Copy)]
enum LedgerStep {
    Insert,
    Delete,
}

async fn run_step<C: Connection>(
    con: C,
    version: &str,
    sql: &str,
    step: LedgerStep,
) -> std::result::Result<(), OrmError> {
    let mut db = Adapter::new(con);
    db.exec_script(sql).await?;
    match step {
        LedgerStep::Insert => {
            db.insert(&[&SchemaMigration::now(version)]).await?;
        }
        LedgerStep::Delete => {
            db.delete_rows::<SchemaMigration>(&Criteria::new().filter(Q::eq("version", version)))
                .await?;
        }
    }
    Ok(())
}

/// Latest migration activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    /// Latest log entries, newest first.
    pub logs: Vec<MigrationLog>,
    /// Latest applied versions, oldest first.
    pub applied: Vec<String>,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "-".repeat(50);
        writeln!(f, "{rule}")?;
        writeln!(f, "Last {STATUS_LIMIT} schema change logs")?;
        writeln!(f, "{rule}")?;
        for log in &self.logs {
            writeln!(f, "{log}")?;
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "Latest migrations info")?;
        writeln!(f, "{rule}")?;
        if self.applied.is_empty() {
            writeln!(f, "No migrations so far")?;
        }
        for version in &self.applied {
            writeln!(f, "{version}")?;
        }
        write!(f, "{rule}")
    }
}

/// Applies registered migrations to a database.
#[derive(Debug, Clone)]
pub struct Migrator<P> {
    pool: P,
    registry: Registry,
}

impl<P: Transactional> Migrator<P> {
    /// Creates a migrator over `pool` for the migrations of `registry`.
    pub const fn new(pool: P, registry: Registry) -> Self {
        Self { pool, registry }
    }

    /// Registered migrations.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    fn adapter(&self) -> Adapter<P> {
        Adapter::new(self.pool.clone())
    }

    async fn log(&self, entry: MigrationLog) -> Result<()> {
        info!(action = %entry.action, version = %entry.version, "{}", entry.message);
        self.adapter().insert(&[&entry]).await?;
        Ok(())
    }

    async fn create_if_missing<T: wear_orm::Record>(&self) -> Result<bool> {
        match self.adapter().create_table::<T>().await {
            Ok(()) => Ok(true),
            Err(e) if e.is_table_exists() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `sql` and the ledger change in one transaction.
    ///
    /// # Panics
    ///
    /// Panics when the transaction can neither commit nor roll back.
    async fn in_tx(
        &self,
        version: &str,
        sql: &str,
        step: LedgerStep,
    ) -> std::result::Result<(), OrmError> {
        let mut tx = self.pool.begin().await?;
        debug!(version = %version, ?step, "Opened migration transaction");

        if let Err(e) = run_step(&mut tx, version, sql, step).await {
            if let Err(re) = tx.rollback().await {
                panic!("migration ({version}): failed to rollback transaction: {re}");
            }
            return Err(e);
        }
        if let Err(e) = tx.commit().await {
            panic!("migration ({version}): failed to commit transaction: {e}");
        }
        Ok(())
    }

    async fn applied(&self, order: Order, limit: Option<u64>) -> Result<Vec<SchemaMigration>> {
        let mut criteria = Criteria::new().order_by("version", order);
        if let Some(limit) = limit {
            criteria = criteria.limit(limit);
        }
        Ok(self.adapter().select(&criteria).await?)
    }

    async fn is_applied(&self, version: &str) -> Result<bool> {
        let mut row = SchemaMigration {
            version: version.to_string(),
            ..SchemaMigration::default()
        };
        Ok(self.adapter().get(&mut row, &Criteria::new()).await?)
    }

    /// Creates the ledger and log tables if needed and logs the
    /// initialization. With `exec_default`, a freshly created ledger also
    /// gets the default schema applied.
    ///
    /// # Errors
    ///
    /// Returns table creation errors other than "table already exists", and
    /// the errors of [`Migrator::execute_migration`].
    pub async fn init_schema(&self, exec_default: bool) -> Result<()> {
        let created = self.create_if_missing::<SchemaMigration>().await?;
        self.create_if_missing::<MigrationLog>().await?;

        for applied in self.applied(Order::Asc, None).await? {
            if !self.registry.contains(&applied.version) {
                warn!(version = %applied.version, "Applied version is not registered");
            }
        }

        self.log(MigrationLog::new(
            Action::Init,
            "Creating mw schema version and log tables",
            "",
        ))
        .await?;

        if created && exec_default {
            self.execute_migration(DEFAULT_ALIAS).await?;
        }
        Ok(())
    }

    /// Applies every registered version missing from the ledger, in
    /// ascending order, each in its own transaction. The default version is
    /// skipped unless `exec_default` is set.
    ///
    /// Returns the versions applied.
    ///
    /// # Errors
    ///
    /// Stops at the first failing version with [`MigrateError::Apply`]; the
    /// versions applied before it stay applied.
    pub async fn update_schema(&self, exec_default: bool) -> Result<Vec<String>> {
        let existing: HashSet<String> = self
            .applied(Order::Asc, None)
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();

        let mut installed = Vec::new();
        for migration in self.registry.migrations() {
            let version = migration.version();
            if existing.contains(version) {
                continue;
            }
            if migration.up_sql().trim().is_empty() {
                return Err(MigrateError::MissingUpSql(version.to_string()));
            }
            if migration.is_default() && !exec_default {
                debug!(version = %version, "Skipping default schema");
                continue;
            }

            self.in_tx(version, migration.up_sql(), LedgerStep::Insert)
                .await
                .map_err(|source| MigrateError::Apply {
                    version: version.to_string(),
                    source,
                })?;
            info!(version = %version, "Applied migration");
            installed.push(version.to_string());
        }

        match installed.last() {
            None => info!("Schema is up to date"),
            Some(last) => {
                let message = format!(
                    "Migration(s) ({}) have been installed",
                    installed.join(", ")
                );
                self.log(MigrationLog::new(Action::Update, message, last))
                    .await?;
            }
        }
        Ok(installed)
    }

    /// Applies one version directly, `default` naming the default schema.
    ///
    /// A version already in the ledger is left alone: its forward SQL is not
    /// run again.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MigrationNotFound`],
    /// [`MigrateError::MissingUpSql`] or [`MigrateError::Apply`].
    pub async fn execute_migration(&self, version: &str) -> Result<()> {
        let version = canonical_version(version);
        let migration = self
            .registry
            .get(version)
            .ok_or_else(|| MigrateError::MigrationNotFound(version.to_string()))?;
        if migration.up_sql().trim().is_empty() {
            return Err(MigrateError::MissingUpSql(version.to_string()));
        }
        if self.is_applied(version).await? {
            warn!(version = %version, "Migration already applied, skipping");
            return Ok(());
        }

        self.in_tx(version, migration.up_sql(), LedgerStep::Insert)
            .await
            .map_err(|source| MigrateError::Apply {
                version: version.to_string(),
                source,
            })?;
        info!(version = %version, "Applied migration");
        Ok(())
    }

    async fn rollback_version(&self, version: &str) -> Result<()> {
        let migration = self
            .registry
            .get(version)
            .ok_or_else(|| MigrateError::MigrationNotFound(version.to_string()))?;
        if migration.down_sql().trim().is_empty() {
            return Err(MigrateError::MissingDownSql(version.to_string()));
        }
        self.in_tx(version, migration.down_sql(), LedgerStep::Delete)
            .await
            .map_err(|source| MigrateError::Rollback {
                version: version.to_string(),
                source,
            })
    }

    /// Runs the reverse SQL of `version` and removes it from the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MigrationNotFound`],
    /// [`MigrateError::MissingDownSql`] or [`MigrateError::Rollback`].
    pub async fn rollback(&self, version: &str) -> Result<()> {
        let version = canonical_version(version);
        self.rollback_version(version).await?;
        self.log(MigrationLog::new(
            Action::Rollback,
            format!("Rolled back migration \"{version}\""),
            version,
        ))
        .await
    }

    /// Rolls back the highest applied version.
    ///
    /// Returns the version rolled back and the one now latest (empty when
    /// none), or `None` when the ledger is empty.
    ///
    /// # Errors
    ///
    /// See [`Migrator::rollback`].
    pub async fn rollback_latest(&self) -> Result<Option<(String, String)>> {
        let Some(latest) = self.applied(Order::Desc, Some(1)).await?.pop() else {
            info!("Nothing to rollback");
            return Ok(None);
        };
        self.rollback_version(&latest.version).await?;

        let previous = self
            .applied(Order::Desc, Some(1))
            .await?
            .pop()
            .map(|m| m.version)
            .unwrap_or_default();
        self.log(MigrationLog::new(
            Action::Rollback,
            format!("Rolled back from \"{}\" to \"{previous}\"", latest.version),
            &latest.version,
        ))
        .await?;
        Ok(Some((latest.version, previous)))
    }

    /// Clears the ledger so every version is applied again by the next
    /// [`Migrator::update_schema`]. No reverse SQL runs.
    ///
    /// # Errors
    ///
    /// Returns the adapter error.
    pub async fn reset(&self) -> Result<()> {
        self.adapter()
            .delete_rows::<SchemaMigration>(&Criteria::new().all())
            .await?;
        self.log(MigrationLog::new(Action::Reset, "Reset all data", ""))
            .await
    }

    /// The latest log entries and applied versions.
    ///
    /// # Errors
    ///
    /// Returns the adapter error.
    pub async fn status(&self) -> Result<Status> {
        let logs: Vec<MigrationLog> = self
            .adapter()
            .select(
                &Criteria::new()
                    .order_by("created", Order::Desc)
                    .order_by("id", Order::Desc)
                    .limit(STATUS_LIMIT),
            )
            .await?;
        let mut applied: Vec<String> = self
            .applied(Order::Desc, Some(STATUS_LIMIT))
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();
        applied.reverse();
        Ok(Status { logs, applied })
    }
}
