//! Connection settings read from `KEY=VALUE` env files or the process
//! environment.

use std::env;
use std::fs;
use std::path::Path;

use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};

use crate::error::{MigrateError, Result};

pub const ENV_HOST: &str = "MYSQL_HOST";
pub const ENV_PORT: &str = "MYSQL_PORT";
pub const ENV_DB_NAME: &str = "MYSQL_DB_NAME";
pub const ENV_USER_NAME: &str = "MYSQL_USER_NAME";
pub const ENV_PASSWORD: &str = "MYSQL_PASSWORD";
pub const ENV_MIGRATION_PATH: &str = "MYSQL_MIGRATION_PATH";
pub const ENV_USE_TLS: &str = "MYSQL_USE_TLS";

const KEYS: [&str; 7] = [
    ENV_HOST,
    ENV_PORT,
    ENV_DB_NAME,
    ENV_USER_NAME,
    ENV_PASSWORD,
    ENV_MIGRATION_PATH,
    ENV_USE_TLS,
];

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3306;
const DEFAULT_USER: &str = "root";

/// MySQL connection values.
///
/// Unset values stay empty (or 0); [`ConnectVals::connect_options`] fills
/// in the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectVals {
    pub host: String,
    /// 0 when unset or invalid.
    pub port: u16,
    pub db_name: String,
    pub user_name: String,
    pub password: String,
    pub migration_path: String,
    pub use_tls: bool,
}

/// Parses a port, 0 when it is not a number in `0..=65535`.
fn parse_port(value: &str) -> u16 {
    value.parse().unwrap_or(0)
}

/// TLS stays on unless explicitly disabled.
fn parse_use_tls(value: &str) -> bool {
    value != "false"
}

impl ConnectVals {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            ENV_HOST => self.host = value.to_string(),
            ENV_PORT => self.port = parse_port(value),
            ENV_DB_NAME => self.db_name = value.to_string(),
            ENV_USER_NAME => self.user_name = value.to_string(),
            ENV_PASSWORD => self.password = value.to_string(),
            ENV_MIGRATION_PATH => self.migration_path = value.to_string(),
            ENV_USE_TLS => self.use_tls = parse_use_tls(value),
            _ => {}
        }
    }

    /// Reads the `MYSQL_*` variables of the process environment.
    #[must_use]
    pub fn from_os_env() -> Self {
        let mut vals = Self::default();
        for key in KEYS {
            if let Ok(value) = env::var(key) {
                vals.set(key, &value);
            }
        }
        vals
    }

    /// Fails when no database name is set.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::Config`].
    pub fn validate(&self) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(MigrateError::Config(format!("{ENV_DB_NAME} required")));
        }
        Ok(())
    }

    /// sqlx connect options, with defaults for unset values.
    ///
    /// Values are handed to sqlx as they are, so a password with URL
    /// reserved characters needs no escaping.
    #[must_use]
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let host = if self.host.is_empty() {
            DEFAULT_HOST
        } else {
            &self.host
        };
        let port = if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        };
        let user = if self.user_name.is_empty() {
            DEFAULT_USER
        } else {
            &self.user_name
        };
        let ssl_mode = if self.use_tls {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Disabled
        };
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(user)
            .database(&self.db_name)
            .ssl_mode(ssl_mode);
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

/// Parses `KEY=VALUE` lines. Blank lines, lines without exactly one `=` and
/// unknown keys are ignored.
#[must_use]
pub fn parse_env(data: &str) -> ConnectVals {
    let mut vals = ConnectVals::default();
    for line in data.lines().map(str::trim) {
        let mut parts = line.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        vals.set(key, value);
    }
    vals
}

/// Reads and parses an env file.
///
/// # Errors
///
/// Returns the IO error.
pub fn read_env_file(path: impl AsRef<Path>) -> Result<ConnectVals> {
    let data = fs::read_to_string(path)?;
    Ok(parse_env(&data))
}
