//! # wear-orm
//!
//! A small ORM for MySQL-flavored databases, built on sqlx.
//!
//! This crate provides:
//! - `#[derive(Record)]` to map a struct onto a table
//! - a reflected, cached [`Model`] per record type
//! - [`Q`] predicates and chainable [`Criteria`]
//! - the [`Adapter`] for insert, update, select, get, delete and count
//! - `LEFT JOIN` assembly into nested one-to-one and one-to-many fields
//! - DDL and source scaffold generation
//!
//! ## Quick Start
//!
//! ```ignore
//! use wear_orm::{Adapter, Criteria, Order, Record, Q};
//! use sqlx::MySqlPool;
//!
//! #[derive(Debug, Default, Record)]
//! struct Payment {
//!     id: i64,
//!     amount: f64,
//!     status: String,
//!     #[column(nullable)]
//!     note: Option<String>,
//! }
//!
//! async fn example(pool: MySqlPool) -> wear_orm::Result<()> {
//!     let mut db = Adapter::new(pool);
//!
//!     db.insert(&[&Payment { amount: 9.5, ..Payment::default() }]).await?;
//!
//!     let pending: Vec<Payment> = db
//!         .select(
//!             &Criteria::new()
//!                 .filter(Q::eq("status", "pending"))
//!                 .order_by("amount", Order::Desc)
//!                 .limit(10),
//!         )
//!         .await?;
//!
//!     let total = db.count::<Payment>(&Criteria::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Joins
//!
//! Relation fields are marked with `#[column(join)]`. A `Vec<T>` field
//! collects every distinct related row, a `T` or `Option<T>` field keeps the
//! last one:
//!
//! ```ignore
//! #[derive(Debug, Default, Record)]
//! #[table(name = "user")]
//! struct UserJoin {
//!     id: String,
//!     name: String,
//!     #[column(join)]
//!     addresses: Vec<Address>,
//! }
//!
//! let users: Vec<UserJoin> = db
//!     .select(&Criteria::new().join(Join::new::<Address>(
//!         "`address`.`user_id` = `user`.`id`",
//!         &[],
//!     )))
//!     .await?;
//! ```
//!
//! ## Bulk mutations
//!
//! [`Adapter::update_rows`] and [`Adapter::delete_rows`] refuse to run
//! without a WHERE clause unless the criteria says so explicitly:
//!
//! ```ignore
//! db.delete_rows::<Payment>(&Criteria::new().all()).await?;
//! ```

extern crate self as wear_orm;

mod adapter;
mod conn;
mod error;
pub mod model;
pub mod query;
mod scan;
pub mod schema;
mod value;

pub use adapter::{Adapter, Changes, DynRecord, LIMIT_INSERT};
pub use conn::{Connection, Dialect, ExecResult, Transactional, TxHandle};
pub use error::{OrmError, Result};
pub use model::{
    column_name, parse_name, resolve, Field, FieldDef, JoinDef, JoinKind, JoinSlot, Model,
    ModelDef, Record, Related,
};
pub use query::{quote_column, CompareOp, Criteria, FilterExpr, Join, Order, OrderBy, Query, Q};
pub use schema::{generate_init, generate_model, generate_model_test, generate_schema};
pub use value::{Affinity, FieldType, Json, ToValue, Value};

pub use wear_derive::Record;

// Re-exported so dependents can name the driver types without a direct dependency.
pub use sqlx;
