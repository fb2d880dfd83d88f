//! The connection abstraction the adapter executes statements through.
//!
//! Pools, single connections and open transactions of both supported
//! drivers implement [`Connection`]; `&mut C` forwards to `C`, so an adapter
//! can borrow a transaction for a few statements and hand it back.

use chrono::{DateTime, Utc};
use sqlx::mysql::{MySql, MySqlConnection, MySqlPool, MySqlQueryResult};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteQueryResult};
use sqlx::{ColumnIndex, Decode, Row, Transaction};

use crate::value::{Affinity, Value};

/// SQL dialect spoken by a connection.
///
/// Only the auto-increment primary key spelling in generated DDL depends on
/// it; every DML statement is the same for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    /// MySQL / MariaDB.
    #[default]
    MySql,
    /// SQLite, used for in-process databases.
    Sqlite,
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Last auto-generated id, when the driver reports one.
    pub last_insert_id: Option<i64>,
}

impl From<SqliteQueryResult> for ExecResult {
    fn from(done: SqliteQueryResult) -> Self {
        Self {
            rows_affected: done.rows_affected(),
            last_insert_id: Some(done.last_insert_rowid()),
        }
    }
}

impl From<MySqlQueryResult> for ExecResult {
    fn from(done: MySqlQueryResult) -> Self {
        Self {
            rows_affected: done.rows_affected(),
            last_insert_id: i64::try_from(done.last_insert_id()).ok(),
        }
    }
}

/// A live connection or transaction handle.
///
/// Each call is one round trip. `kinds` tells the decoder which affinity to
/// read every result column as.
#[allow(async_fn_in_trait)]
pub trait Connection {
    /// Dialect of the underlying engine.
    fn dialect(&self) -> Dialect;

    /// Executes one statement with positional arguments.
    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, sqlx::Error>;

    /// Executes an unprepared, possibly multi-statement script.
    async fn exec_script(&mut self, sql: &str) -> Result<ExecResult, sqlx::Error>;

    /// Runs a query and decodes every row.
    async fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        kinds: &[Affinity],
    ) -> Result<Vec<Vec<Value>>, sqlx::Error>;

    /// Runs a query and decodes the first row, if any.
    async fn query_row(
        &mut self,
        sql: &str,
        args: &[Value],
        kinds: &[Affinity],
    ) -> Result<Option<Vec<Value>>, sqlx::Error>;
}

/// A connection handle that can be committed or rolled back.
#[allow(async_fn_in_trait)]
pub trait TxHandle: Connection {
    /// Commits the transaction.
    async fn commit(self) -> Result<(), sqlx::Error>;

    /// Rolls the transaction back.
    async fn rollback(self) -> Result<(), sqlx::Error>;
}

/// A pool that can open transactions.
#[allow(async_fn_in_trait)]
pub trait Transactional: Connection + Clone {
    /// Transaction handle type.
    type Tx: TxHandle;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;
}

impl<C: Connection> Connection for &mut C {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, sqlx::Error> {
        (**self).exec(sql, args).await
    }

    async fn exec_script(&mut self, sql: &str) -> Result<ExecResult, sqlx::Error> {
        (**self).exec_script(sql).await
    }

    async fn query(
        &mut self,
        sql: &str,
        args: &[Value],
        kinds: &[Affinity],
    ) -> Result<Vec<Vec<Value>>, sqlx::Error> {
        (**self).query(sql, args, kinds).await
    }

    async fn query_row(
        &mut self,
        sql: &str,
        args: &[Value],
        kinds: &[Affinity],
    ) -> Result<Option<Vec<Value>>, sqlx::Error> {
        (**self).query_row(sql, args, kinds).await
    }
}

macro_rules! bind_values {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                Value::Null => query.bind(None::<i64>),
                Value::Bool(b) => query.bind(*b),
                Value::Int(i) => query.bind(*i),
                Value::Float(f) => query.bind(*f),
                Value::Text(s) => query.bind(s.clone()),
                Value::Timestamp(t) => query.bind(*t),
                Value::Json(j) => query.bind(j.to_string()),
            };
        }
        query
    }};
}

fn json_column(raw: Option<String>) -> Result<Value, sqlx::Error> {
    match raw {
        None => Ok(Value::Null),
        Some(s) if s.trim().is_empty() => Ok(Value::Null),
        Some(s) => serde_json::from_str(&s)
            .map(Value::Json)
            .map_err(|e| sqlx::Error::Decode(Box::new(e))),
    }
}

/// Decodes one row column by column according to `kinds`.
///
/// Decoding is unchecked: the declared affinity decides the Rust type, the
/// driver's column metadata is not consulted. SQLite reports declared types
/// loosely and MySQL widens integers, so the affinity is the reliable side.
fn decode_row<'r, R>(row: &'r R, kinds: &[Affinity]) -> Result<Vec<Value>, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    Option<String>: Decode<'r, R::Database>,
    Option<i64>: Decode<'r, R::Database>,
    Option<f64>: Decode<'r, R::Database>,
    Option<bool>: Decode<'r, R::Database>,
    Option<DateTime<Utc>>: Decode<'r, R::Database>,
{
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| {
            Ok(match kind {
                Affinity::Text | Affinity::PkString => row
                    .try_get_unchecked::<Option<String>, _>(idx)?
                    .map_or(Value::Null, Value::Text),
                Affinity::SmallInt | Affinity::Integer | Affinity::PkInt => row
                    .try_get_unchecked::<Option<i64>, _>(idx)?
                    .map_or(Value::Null, Value::Int),
                Affinity::Float => row
                    .try_get_unchecked::<Option<f64>, _>(idx)?
                    .map_or(Value::Null, Value::Float),
                Affinity::Bool => row
                    .try_get_unchecked::<Option<bool>, _>(idx)?
                    .map_or(Value::Null, Value::Bool),
                Affinity::Timestamp => row
                    .try_get_unchecked::<Option<DateTime<Utc>>, _>(idx)?
                    .map_or(Value::Null, Value::Timestamp),
                Affinity::Json => json_column(row.try_get_unchecked::<Option<String>, _>(idx)?)?,
            })
        })
        .collect()
}

macro_rules! impl_connection {
    ($db:ty, $dialect:expr, $( $ty:ty => |$this:ident| $exec:expr ),+ $(,)?) => {$(
        impl Connection for $ty {
            fn dialect(&self) -> Dialect {
                $dialect
            }

            async fn exec(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, sqlx::Error> {
                let $this = self;
                let done = bind_values!(sqlx::query::<$db>(sql), args)
                    .execute($exec)
                    .await?;
                Ok(done.into())
            }

            async fn exec_script(&mut self, sql: &str) -> Result<ExecResult, sqlx::Error> {
                let $this = self;
                let done = sqlx::raw_sql(sql).execute($exec).await?;
                Ok(done.into())
            }

            async fn query(
                &mut self,
                sql: &str,
                args: &[Value],
                kinds: &[Affinity],
            ) -> Result<Vec<Vec<Value>>, sqlx::Error> {
                let $this = self;
                let rows = bind_values!(sqlx::query::<$db>(sql), args)
                    .fetch_all($exec)
                    .await?;
                rows.iter().map(|row| decode_row(row, kinds)).collect()
            }

            async fn query_row(
                &mut self,
                sql: &str,
                args: &[Value],
                kinds: &[Affinity],
            ) -> Result<Option<Vec<Value>>, sqlx::Error> {
                let $this = self;
                let row = bind_values!(sqlx::query::<$db>(sql), args)
                    .fetch_optional($exec)
                    .await?;
                row.as_ref().map(|row| decode_row(row, kinds)).transpose()
            }
        }
    )+};
}

impl_connection!(
    Sqlite,
    Dialect::Sqlite,
    SqlitePool => |this| &*this,
    SqliteConnection => |this| &mut *this,
    Transaction<'static, Sqlite> => |this| &mut **this,
);

impl_connection!(
    MySql,
    Dialect::MySql,
    MySqlPool => |this| &*this,
    MySqlConnection => |this| &mut *this,
    Transaction<'static, MySql> => |this| &mut **this,
);

macro_rules! impl_transactional {
    ($($db:ty => $pool:ty),+ $(,)?) => {$(
        impl TxHandle for Transaction<'static, $db> {
            async fn commit(self) -> Result<(), sqlx::Error> {
                Transaction::commit(self).await
            }

            async fn rollback(self) -> Result<(), sqlx::Error> {
                Transaction::rollback(self).await
            }
        }

        impl Transactional for $pool {
            type Tx = Transaction<'static, $db>;

            async fn begin(&self) -> Result<Self::Tx, sqlx::Error> {
                sqlx::Pool::begin(self).await
            }
        }
    )+};
}

impl_transactional!(Sqlite => SqlitePool, MySql => MySqlPool);
