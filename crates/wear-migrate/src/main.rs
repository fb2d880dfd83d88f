//! wear-migrate CLI
//!
//! Command-line tool for managing SQL schema migrations.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wear_migrate::{new_migration, read_env_file, ConnectVals, Migrator, Registry};
use wear_orm::{generate_init, Transactional};

/// SQL schema migrations for MySQL.
#[derive(Parser)]
#[command(name = "wear-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Env file with MYSQL_* settings (the process environment otherwise).
    #[arg(long, env = "WEAR_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Database URL, overriding the MYSQL_* settings. `sqlite:` URLs are
    /// accepted too.
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Migrations directory, overriding MYSQL_MIGRATION_PATH.
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Enable verbose output (logs every SQL statement).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations.
    Up {
        /// Also apply the default schema.
        #[arg(long)]
        exec_default: bool,
    },

    /// Create the ledger and log tables.
    Init {
        /// Apply the default schema on a fresh ledger.
        #[arg(long)]
        exec_default: bool,
    },

    /// Apply one version (`default` for the default schema).
    Exec {
        /// Version to apply.
        version: String,
    },

    /// Roll back one version, the latest when omitted.
    Rollback {
        /// Version to roll back.
        version: Option<String>,
    },

    /// Clear the ledger without running any reverse SQL.
    Reset,

    /// Show recent log entries and applied versions.
    Status {
        /// Print JSON instead of the text report.
        #[arg(long)]
        json: bool,
    },

    /// Create an empty migration pair.
    NewMigration {
        /// Create the default schema instead of a timestamped version.
        #[arg(long)]
        default: bool,
    },

    /// Print a scaffold program for a new record type.
    GenInit {
        /// Struct name, e.g. `Payment`.
        struct_name: String,
        /// Short variable name, e.g. `p`.
        short_name: String,
    },
}

/// Commands that need a database connection.
#[derive(Debug, PartialEq, Eq)]
enum DbCommand {
    Up { exec_default: bool },
    Init { exec_default: bool },
    Exec { version: String },
    Rollback { version: Option<String> },
    Reset,
    Status { json: bool },
}

/// Commands served without a database.
enum LocalCommand {
    NewMigration { default: bool },
    GenInit { struct_name: String, short_name: String },
}

impl Commands {
    fn split(self) -> Result<DbCommand, LocalCommand> {
        match self {
            Self::Up { exec_default } => Ok(DbCommand::Up { exec_default }),
            Self::Init { exec_default } => Ok(DbCommand::Init { exec_default }),
            Self::Exec { version } => Ok(DbCommand::Exec { version }),
            Self::Rollback { version } => Ok(DbCommand::Rollback { version }),
            Self::Reset => Ok(DbCommand::Reset),
            Self::Status { json } => Ok(DbCommand::Status { json }),
            Self::NewMigration { default } => Err(LocalCommand::NewMigration { default }),
            Self::GenInit {
                struct_name,
                short_name,
            } => Err(LocalCommand::GenInit {
                struct_name,
                short_name,
            }),
        }
    }
}

fn migrations_dir(flag: Option<PathBuf>, vals: &ConnectVals) -> anyhow::Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if vals.migration_path.is_empty() {
        anyhow::bail!(
            "migration path required: pass --migrations-dir or set MYSQL_MIGRATION_PATH"
        );
    }
    Ok(PathBuf::from(&vals.migration_path))
}

async fn run<P: Transactional>(pool: P, dir: &Path, command: DbCommand) -> anyhow::Result<()> {
    let registry = Registry::from_dir(dir)
        .with_context(|| format!("fail register migration path {}", dir.display()))?;
    let migrator = Migrator::new(pool, registry);

    match command {
        DbCommand::Up { exec_default } => {
            migrator.update_schema(exec_default).await?;
        }
        DbCommand::Init { exec_default } => {
            migrator.init_schema(exec_default).await?;
            info!("Schema versioning is now initialized. Run `wear-migrate status` for info");
        }
        DbCommand::Exec { version } => {
            migrator.execute_migration(&version).await?;
        }
        DbCommand::Rollback {
            version: Some(version),
        } => {
            migrator.rollback(&version).await?;
        }
        DbCommand::Rollback { version: None } => {
            migrator.rollback_latest().await?;
        }
        DbCommand::Reset => {
            migrator.reset().await?;
        }
        DbCommand::Status { json } => {
            let status = migrator.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{status}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let vals = match &cli.env_file {
        Some(path) => read_env_file(path)
            .with_context(|| format!("cannot read env file {}", path.display()))?,
        None => ConnectVals::from_os_env(),
    };

    let command = match cli.command.split() {
        Ok(command) => command,
        Err(LocalCommand::GenInit {
            struct_name,
            short_name,
        }) => {
            println!("{}", generate_init(&struct_name, &short_name));
            return Ok(());
        }
        Err(LocalCommand::NewMigration { default }) => {
            let dir = migrations_dir(cli.migrations_dir, &vals)?;
            let version = new_migration(&dir, default)?;
            info!(version = %version, "Created migration files in {}", dir.display());
            return Ok(());
        }
    };

    let dir = migrations_dir(cli.migrations_dir, &vals)?;
    match cli.database_url {
        Some(url) if url.starts_with("sqlite:") => {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await?;
            run(pool, &dir, command).await
        }
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await
                .context("fail init DB")?;
            run(pool, &dir, command).await
        }
        None => {
            vals.validate()?;
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .connect_with(vals.connect_options())
                .await
                .context("fail init DB")?;
            run(pool, &dir, command).await
        }
    }
}
