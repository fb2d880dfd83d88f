//! Query options: filters, column selection, ordering, paging and joins.
//!
//! [`Criteria`] is the option list handed to adapter operations. It compiles
//! into a [`Query`], the WHERE-and-beyond fragment plus everything the
//! adapter needs to render the full statement.

mod filter;

use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::Arc;
use std::vec;

pub use filter::{quote_column, CompareOp, FilterExpr, Q};

use crate::error::Result;
use crate::model::{resolve, Field, Model, Record, Related};
use crate::scan;
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("ASC"),
            Self::Desc => f.write_str("DESC"),
        }
    }
}

/// An ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to order by
    pub column: String,
    /// Order direction
    pub direction: Order,
}

pub(crate) type BuildRelated =
    fn(&Model, &[&Field], &mut vec::IntoIter<Value>) -> Result<(String, Related)>;

/// The record type a join decodes into.
#[derive(Clone, Copy)]
pub struct JoinTarget {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) resolve: fn() -> Result<Arc<Model>>,
    pub(crate) build: BuildRelated,
}

impl JoinTarget {
    /// Target for record type `T`.
    #[must_use]
    pub fn of<T: Record>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            resolve: resolve::<T>,
            build: scan::build_related::<T>,
        }
    }
}

impl fmt::Debug for JoinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinTarget")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A `LEFT JOIN` of another record type.
///
/// ```ignore
/// let criteria = Criteria::new().join(Join::new::<Address>(
///     "`address`.`user_id` = `user`.`id`",
///     &[],
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct Join {
    pub(crate) target: JoinTarget,
    pub(crate) condition: String,
    pub(crate) columns: Vec<String>,
}

impl Join {
    /// Joins records of type `T` on `condition`, selecting `columns` of it
    /// (all columns when empty).
    #[must_use]
    pub fn new<T: Record>(condition: &str, columns: &[&str]) -> Self {
        Self {
            target: JoinTarget::of::<T>(),
            condition: condition.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Join condition text.
    #[must_use]
    pub fn condition(&self) -> &str {
        &self.condition
    }
}

/// A compiled option list.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// `WHERE ... ORDER BY ... LIMIT ... OFFSET ...`, each part optional.
    pub sql: String,
    /// Positional arguments, in binding order.
    pub args: Vec<Value>,
    /// Explicit permission to touch every row.
    pub match_all: bool,
    /// Column allow-list; empty selects every column.
    pub columns: Vec<String>,
    /// Joins to render before the predicate.
    pub joins: Vec<Join>,
    has_where: bool,
}

impl Query {
    /// Whether the fragment carries a WHERE clause.
    #[must_use]
    pub const fn has_where(&self) -> bool {
        self.has_where
    }

    /// Whether a bulk UPDATE or DELETE may run with this query.
    #[must_use]
    pub const fn allows_bulk(&self) -> bool {
        self.has_where || self.match_all
    }
}

/// Chainable query options.
///
/// # Example
///
/// ```ignore
/// use wear_orm::{Criteria, Order, Q};
///
/// let criteria = Criteria::new()
///     .filter(Q::eq("status", "active"))
///     .order_by("created", Order::Desc)
///     .limit(10);
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct Criteria {
    filters: Vec<FilterExpr>,
    columns: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    joins: Vec<Join>,
    match_all: bool,
}

impl Criteria {
    /// Empty option list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter; multiple filters are combined with AND.
    ///
    /// A filter that holds for every row (such as an empty `Q::and_all`)
    /// adds nothing: it neither counts as a WHERE clause nor makes the
    /// options non-empty.
    pub fn filter(mut self, q: Q) -> Self {
        let expr = q.into_expr();
        if !expr.matches_everything() {
            self.filters.push(expr);
        }
        self
    }

    /// Restricts the selected columns. The primary key is always selected.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns
            .extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    /// Appends an ordering key.
    pub fn order_by(mut self, column: &str, direction: Order) -> Self {
        self.order_by.push(OrderBy {
            column: column.to_string(),
            direction,
        });
        self
    }

    /// Limits the number of rows.
    pub const fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` rows.
    pub const fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Adds a join.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Explicitly permits a bulk mutation without a WHERE clause.
    pub const fn all(mut self) -> Self {
        self.match_all = true;
        self
    }

    /// Whether no option at all was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.columns.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.joins.is_empty()
            && !self.match_all
    }

    /// Compiles the options into a [`Query`].
    pub fn compile(&self) -> Query {
        let mut args = Vec::new();
        let mut parts = Vec::new();

        let has_where = !self.filters.is_empty();
        if has_where {
            let conditions: Vec<String> = self
                .filters
                .iter()
                .map(|expr| {
                    let sql = filter::build_filter_expr(expr, &mut args);
                    match expr {
                        FilterExpr::Or(c) if c.len() > 1 => format!("({sql})"),
                        FilterExpr::Raw { .. } if self.filters.len() > 1 => format!("({sql})"),
                        _ => sql,
                    }
                })
                .collect();
            parts.push(format!("WHERE {}", conditions.join(" AND ")));
        }

        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", quote_column(&o.column), o.direction))
                .collect();
            parts.push(format!("ORDER BY {}", keys.join(", ")));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => parts.push(format!("LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => parts.push(format!("LIMIT {limit}")),
            (None, Some(offset)) => parts.push(format!("LIMIT {} OFFSET {offset}", i64::MAX)),
            (None, None) => {}
        }

        Query {
            sql: parts.join(" "),
            args,
            match_all: self.match_all,
            columns: self.columns.clone(),
            joins: self.joins.clone(),
            has_where,
        }
    }
}

impl From<Q> for Criteria {
    fn from(q: Q) -> Self {
        Self::new().filter(q)
    }
}
