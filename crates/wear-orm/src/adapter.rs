//! The CRUD adapter.
//!
//! [`Adapter`] renders one statement per call from model metadata and
//! compiled [`Criteria`], executes it on its connection and decodes the
//! results. It knows nothing about transactions: wrap a transaction handle
//! (or `&mut` one) to run statements inside it.
//!
//! Every fallible operation has a `must_*` twin that panics on error, meant
//! for setup code and migrations.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::conn::{Connection, ExecResult};
use crate::error::{OrmError, Result};
use crate::model::{quote, resolve, Field, Model, Record};
use crate::query::{Criteria, Join};
use crate::scan::{self, JoinPlan};
use crate::schema::create_table_sql;
use crate::value::{Affinity, Value};

/// Most records a single insert accepts.
pub const LIMIT_INSERT: usize = 1000;

/// Column to value assignments for [`Adapter::update_rows`], in column order.
pub type Changes = BTreeMap<String, Value>;

/// Object-safe view of a record, so one insert can take mixed types and
/// reject them.
pub trait DynRecord: Send + Sync {
    /// Model of the record's type.
    fn model(&self) -> Result<Arc<Model>>;

    /// Encoded value of the field at `pos`.
    fn value_at(&self, pos: usize) -> Value;
}

impl<T: Record> DynRecord for T {
    fn model(&self) -> Result<Arc<Model>> {
        resolve::<T>()
    }

    fn value_at(&self, pos: usize) -> Value {
        self.column_value(pos)
    }
}

/// Handles basic operations over a [`Connection`].
#[derive(Debug)]
pub struct Adapter<C> {
    con: C,
}

fn statement(head: &str, tail: &str) -> String {
    if tail.is_empty() {
        format!("{head};")
    } else {
        format!("{head} {tail};")
    }
}

fn bind_value(field: &Field, value: Value) -> Value {
    // a zero auto-increment key lets the engine assign the id
    if field.affinity() == Affinity::PkInt && value.key().is_empty() {
        Value::Null
    } else {
        value
    }
}

fn select_list(fields: &[&Field]) -> String {
    fields
        .iter()
        .map(|f| f.quoted_select())
        .collect::<Vec<_>>()
        .join(", ")
}

fn resolve_targets(joins: &[Join]) -> Result<Vec<Arc<Model>>> {
    joins.iter().map(|j| (j.target.resolve)()).collect()
}

fn join_plans<'a>(
    root: &Model,
    joins: &[Join],
    targets: &'a [Arc<Model>],
) -> Result<Vec<JoinPlan<'a>>> {
    let mut plans = Vec::with_capacity(joins.len());
    for (join, target) in joins.iter().zip(targets) {
        let slot = root.join_slot(join.target.type_id);
        if target.is_link_only() {
            continue;
        }
        let slot = slot.ok_or_else(|| OrmError::UnknownJoin(join.target.type_name.to_string()))?;
        target.require_primary_key()?;
        plans.push(JoinPlan {
            model: target,
            fields: target.select_fields(&join.columns)?,
            slot: slot.clone(),
            build: join.target.build,
        });
    }
    Ok(plans)
}

fn select_head(
    model: &Model,
    fields: &[&Field],
    joins: &[Join],
    targets: &[Arc<Model>],
    plans: &[JoinPlan<'_>],
) -> String {
    let mut columns = if fields.len() == model.fields().len() {
        model
            .select_list
            .get_or_init(|| select_list(fields))
            .clone()
    } else {
        select_list(fields)
    };
    for plan in plans {
        let joined: Vec<&str> = plan.fields.iter().map(|f| f.joined()).collect();
        if !joined.is_empty() {
            columns.push_str(", ");
            columns.push_str(&joined.join(", "));
        }
    }

    let mut head = format!("SELECT {columns} FROM {}", quote(model.table()));
    for (join, target) in joins.iter().zip(targets) {
        head.push_str(&format!(
            " LEFT JOIN {} ON {}",
            quote(target.table()),
            join.condition()
        ));
    }
    head
}

impl<C: Connection> Adapter<C> {
    /// Wraps a connection, pool or transaction handle.
    pub const fn new(con: C) -> Self {
        Self { con }
    }

    /// The wrapped connection.
    pub fn connection(&mut self) -> &mut C {
        &mut self.con
    }

    /// Unwraps the connection.
    pub fn into_inner(self) -> C {
        self.con
    }

    async fn execute(
        &mut self,
        op: &'static str,
        sql: &str,
        args: &[Value],
    ) -> Result<ExecResult> {
        debug!(sql = %sql, args = args.len(), "Executing SQL");
        self.con
            .exec(sql, args)
            .await
            .map_err(OrmError::statement(op))
    }

    async fn fetch(
        &mut self,
        op: &'static str,
        sql: &str,
        args: &[Value],
        kinds: &[Affinity],
    ) -> Result<Vec<Vec<Value>>> {
        debug!(sql = %sql, args = args.len(), "Executing SQL");
        self.con
            .query(sql, args, kinds)
            .await
            .map_err(OrmError::statement(op))
    }

    /// Creates the table of `T` using the connection's dialect.
    ///
    /// # Errors
    ///
    /// Returns the engine error; check [`OrmError::is_table_exists`] to
    /// tolerate an existing table.
    pub async fn create_table<T: Record>(&mut self) -> Result<()> {
        let model = resolve::<T>()?;
        let sql = create_table_sql(&model, self.con.dialect());
        self.execute("create table", &sql, &[]).await.map(|_| ())
    }

    /// Executes an unprepared, possibly multi-statement script.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn exec_script(&mut self, sql: &str) -> Result<ExecResult> {
        debug!(sql = %sql, "Executing SQL script");
        self.con
            .exec_script(sql)
            .await
            .map_err(OrmError::statement("script"))
    }

    /// Reads a SQL file and executes it as a script.
    ///
    /// # Errors
    ///
    /// Returns the read or engine error.
    pub async fn exec_file(&mut self, path: impl AsRef<Path>) -> Result<ExecResult> {
        let sql = tokio::fs::read_to_string(path.as_ref()).await?;
        self.exec_script(&sql).await
    }

    /// Inserts up to [`LIMIT_INSERT`] records of one table in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Validation`] for an empty batch, an oversized
    /// batch or records of different tables, and the engine error otherwise.
    pub async fn insert(&mut self, records: &[&dyn DynRecord]) -> Result<ExecResult> {
        let Some(first) = records.first() else {
            return Err(OrmError::Validation("nothing to insert".into()));
        };
        if records.len() > LIMIT_INSERT {
            return Err(OrmError::Validation(format!(
                "insertion of more than ({LIMIT_INSERT}) items not allowed"
            )));
        }

        let model = first.model()?;
        model.require_primary_key()?;
        let mut args = Vec::with_capacity(model.fields().len() * records.len());
        for record in records {
            if record.model()?.table() != model.table() {
                return Err(OrmError::Validation(
                    "cannot insert items from different tables".into(),
                ));
            }
            args.extend(
                model
                    .fields()
                    .iter()
                    .map(|f| bind_value(f, record.value_at(f.pos()))),
            );
        }

        let columns = model.insert_columns.get_or_init(|| {
            model
                .fields()
                .iter()
                .map(Field::quoted)
                .collect::<Vec<_>>()
                .join(", ")
        });
        let group = format!("({})", vec!["?"; model.fields().len()].join(", "));
        let sql = format!(
            "INSERT INTO {}({columns}) VALUES {};",
            quote(model.table()),
            vec![group.as_str(); records.len()].join(",")
        );
        self.execute("insert", &sql, &args).await
    }

    /// Inserts a slice of records of one type.
    ///
    /// # Errors
    ///
    /// See [`Adapter::insert`].
    pub async fn insert_slice<T: Record>(&mut self, records: &[T]) -> Result<ExecResult> {
        let refs: Vec<&dyn DynRecord> = records.iter().map(|r| r as &dyn DynRecord).collect();
        self.insert(&refs).await
    }

    /// Updates every non-key column of `record` by its primary key.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MissingPrimaryKey`] when `T` has no key.
    pub async fn update<T: Record>(&mut self, record: &T) -> Result<()> {
        let model = resolve::<T>()?;
        let pk = model.require_primary_key()?;
        let mut args: Vec<Value> = model
            .fields_no_pk()
            .map(|f| record.column_value(f.pos()))
            .collect();
        if args.is_empty() {
            return Err(OrmError::Validation(format!(
                "table ({}) has no columns to update",
                model.table()
            )));
        }
        args.push(record.column_value(pk.pos()));

        let set = model.update_set.get_or_init(|| {
            model
                .fields_no_pk()
                .map(|f| format!("{} = ?", f.quoted()))
                .collect::<Vec<_>>()
                .join(", ")
        });
        let sql = format!(
            "UPDATE {} SET {set} WHERE {} = ?;",
            quote(model.table()),
            pk.quoted()
        );
        self.execute("update", &sql, &args).await.map(|_| ())
    }

    /// Updates the given columns on every row matching `criteria`.
    ///
    /// A criteria without a WHERE clause is refused unless it carries the
    /// match-all marker ([`Criteria::all`]).
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Validation`] for empty changes or criteria, a
    /// missing WHERE clause or a change to the primary key, and
    /// [`OrmError::InvalidField`] for unknown columns.
    pub async fn update_rows<T: Record>(
        &mut self,
        changes: &Changes,
        criteria: &Criteria,
    ) -> Result<u64> {
        if changes.is_empty() {
            return Err(OrmError::Validation("columns for update cannot be empty".into()));
        }
        if criteria.is_empty() {
            return Err(OrmError::Validation("query options cannot be empty".into()));
        }
        let query = criteria.compile();
        if !query.allows_bulk() {
            return Err(OrmError::Validation("query options cannot be empty".into()));
        }

        let model = resolve::<T>()?;
        let mut set = Vec::with_capacity(changes.len());
        let mut args = Vec::with_capacity(changes.len() + query.args.len());
        for (column, value) in changes {
            let field = model
                .field_by_column(column)
                .ok_or_else(|| OrmError::InvalidField(column.clone()))?;
            if matches!(field.affinity(), Affinity::PkInt | Affinity::PkString) {
                return Err(OrmError::Validation(format!(
                    "primary key ({column}) cannot be updated"
                )));
            }
            set.push(format!("{} = ?", field.quoted()));
            args.push(value.clone());
        }
        args.extend(query.args.iter().cloned());

        let head = format!("UPDATE {} SET {}", quote(model.table()), set.join(", "));
        let sql = statement(&head, &query.sql);
        Ok(self.execute("update", &sql, &args).await?.rows_affected)
    }

    /// Replaces `dest` with the rows matching `criteria`, joins assembled.
    ///
    /// An empty criteria selects every row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownJoin`] for a join the root does not declare,
    /// [`OrmError::InvalidField`] for unknown columns, decode errors and the
    /// engine error.
    pub async fn select_into<T: Record>(
        &mut self,
        dest: &mut Vec<T>,
        criteria: &Criteria,
    ) -> Result<()> {
        let model = resolve::<T>()?;
        let query = criteria.compile();
        let fields = model.select_fields(&query.columns)?;
        let targets = resolve_targets(&query.joins)?;
        let plans = join_plans(&model, &query.joins, &targets)?;

        let head = select_head(&model, &fields, &query.joins, &targets, &plans);
        let sql = statement(&head, &query.sql);
        let kinds: Vec<Affinity> = fields
            .iter()
            .chain(plans.iter().flat_map(|p| p.fields.iter()))
            .map(|f| f.affinity())
            .collect();
        let rows = self.fetch("select", &sql, &query.args, &kinds).await?;
        scan::assemble(&model, &fields, &plans, rows, dest)
    }

    /// Returns the rows matching `criteria`.
    ///
    /// # Errors
    ///
    /// See [`Adapter::select_into`].
    pub async fn select<T: Record>(&mut self, criteria: &Criteria) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        self.select_into(&mut rows, criteria).await?;
        Ok(rows)
    }

    /// Loads one row into `record`.
    ///
    /// With a filter, ordering, paging or a join the first row matching
    /// `criteria` is taken. Without any of them the row is looked up by
    /// `record`'s own primary key. This includes a criteria that only
    /// restricts columns: it loads the allowed columns of the keyed row, not
    /// the first row of the table. Returns `false` when nothing matched,
    /// leaving `record` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MissingPrimaryKey`] when `T` has no key, decode
    /// errors and the engine error.
    pub async fn get<T: Record>(&mut self, record: &mut T, criteria: &Criteria) -> Result<bool> {
        let model = resolve::<T>()?;
        let pk = model.require_primary_key()?;
        let query = criteria.compile();

        if !query.joins.is_empty() {
            let mut found: Vec<T> = Vec::new();
            self.select_into(&mut found, criteria).await?;
            return match found.into_iter().next() {
                Some(first) => {
                    *record = first;
                    Ok(true)
                }
                None => Ok(false),
            };
        }

        let fields = model.select_fields(&query.columns)?;
        let (tail, args) = if query.sql.is_empty() {
            (
                format!("WHERE {} = ?", pk.quoted()),
                vec![record.column_value(pk.pos())],
            )
        } else {
            (query.sql, query.args)
        };
        let sql = statement(&select_head(&model, &fields, &[], &[], &[]), &tail);
        let kinds: Vec<Affinity> = fields.iter().map(|f| f.affinity()).collect();

        debug!(sql = %sql, args = args.len(), "Executing SQL");
        let row = self
            .con
            .query_row(&sql, &args, &kinds)
            .await
            .map_err(OrmError::statement("get"))?;
        match row {
            Some(values) => {
                scan::fill_record(record, &fields, &mut values.into_iter(), true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deletes `record` by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Validation`] when the key holds its zero value.
    pub async fn delete<T: Record>(&mut self, record: &T) -> Result<()> {
        let model = resolve::<T>()?;
        let pk = model.require_primary_key()?;
        let value = record.column_value(pk.pos());
        if value.key().is_empty() {
            return Err(OrmError::Validation(format!(
                "cannot delete from table ({}), primary key not set",
                model.table()
            )));
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?;",
            quote(model.table()),
            pk.quoted()
        );
        self.execute("delete", &sql, &[value]).await.map(|_| ())
    }

    /// Deletes every row matching `criteria`, with the same match-all gate
    /// as [`Adapter::update_rows`].
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Validation`] when the criteria has no WHERE clause
    /// and no match-all marker.
    pub async fn delete_rows<T: Record>(&mut self, criteria: &Criteria) -> Result<u64> {
        let query = criteria.compile();
        if !query.allows_bulk() {
            return Err(OrmError::Validation("query options cannot be empty".into()));
        }
        let model = resolve::<T>()?;
        let head = format!("DELETE FROM {}", quote(model.table()));
        let sql = statement(&head, &query.sql);
        Ok(self.execute("delete", &sql, &query.args).await?.rows_affected)
    }

    /// Counts the rows of `T`'s table matching `criteria`. Column selection
    /// and joins are ignored.
    ///
    /// # Errors
    ///
    /// Returns the engine error.
    pub async fn count<T: Record>(&mut self, criteria: &Criteria) -> Result<i64> {
        let model = resolve::<T>()?;
        let query = criteria.compile();
        let head = format!("SELECT COUNT(*) FROM {}", quote(model.table()));
        let sql = statement(&head, &query.sql);
        let rows = self
            .fetch("count", &sql, &query.args, &[Affinity::Integer])
            .await?;
        match rows.into_iter().next().and_then(|row| row.into_iter().next()) {
            Some(Value::Int(n)) => Ok(n),
            _ => Ok(0),
        }
    }

    /// [`Adapter::create_table`], panicking on error.
    pub async fn must_create_table<T: Record>(&mut self) {
        if let Err(e) = self.create_table::<T>().await {
            panic!("create table failed: {e}");
        }
    }

    /// [`Adapter::insert`], panicking on error.
    pub async fn must_insert(&mut self, records: &[&dyn DynRecord]) -> ExecResult {
        self.insert(records)
            .await
            .unwrap_or_else(|e| panic!("insert failed: {e}"))
    }

    /// [`Adapter::update`], panicking on error.
    pub async fn must_update<T: Record>(&mut self, record: &T) {
        if let Err(e) = self.update(record).await {
            panic!("update failed: {e}");
        }
    }

    /// [`Adapter::update_rows`], panicking on error.
    pub async fn must_update_rows<T: Record>(
        &mut self,
        changes: &Changes,
        criteria: &Criteria,
    ) -> u64 {
        self.update_rows::<T>(changes, criteria)
            .await
            .unwrap_or_else(|e| panic!("update rows failed: {e}"))
    }

    /// [`Adapter::select_into`], panicking on error.
    pub async fn must_select<T: Record>(&mut self, dest: &mut Vec<T>, criteria: &Criteria) {
        if let Err(e) = self.select_into(dest, criteria).await {
            panic!("select failed: {e}");
        }
    }

    /// [`Adapter::get`], panicking on error.
    pub async fn must_get<T: Record>(&mut self, record: &mut T, criteria: &Criteria) -> bool {
        self.get(record, criteria)
            .await
            .unwrap_or_else(|e| panic!("failed to get item: {e}"))
    }

    /// [`Adapter::delete`], panicking on error.
    pub async fn must_delete<T: Record>(&mut self, record: &T) {
        if let Err(e) = self.delete(record).await {
            panic!("delete failed: {e}");
        }
    }

    /// [`Adapter::delete_rows`], panicking on error.
    pub async fn must_delete_rows<T: Record>(&mut self, criteria: &Criteria) -> u64 {
        self.delete_rows::<T>(criteria)
            .await
            .unwrap_or_else(|e| panic!("delete rows failed: {e}"))
    }

    /// [`Adapter::count`], panicking on error.
    pub async fn must_count<T: Record>(&mut self, criteria: &Criteria) -> i64 {
        self.count::<T>(criteria)
            .await
            .unwrap_or_else(|e| panic!("count failed: {e}"))
    }
}
