//! Q objects: the predicate tree compiled into a WHERE clause.
//!
//! Conditions nest arbitrarily through [`Q::and`] / [`Q::or`] and compile
//! into SQL text plus positional arguments in binding order.

use std::fmt;

use crate::value::{ToValue, Value};

/// A filter expression that can be combined with other expressions.
///
/// # Example
///
/// ```ignore
/// use wear_orm::Q;
///
/// let filter = Q::eq("status", "active")
///     .and(Q::gt("age", 18).or(Q::eq("verified", true)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Q {
    expr: FilterExpr,
}

/// Internal filter expression representation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Simple comparison: column op value
    Comparison {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// IS NULL check
    IsNull { column: String },
    /// IS NOT NULL check
    IsNotNull { column: String },
    /// IN list check
    InList { column: String, values: Vec<Value> },
    /// LIKE pattern match
    Like { column: String, pattern: String },
    /// Every child must hold
    And(Vec<FilterExpr>),
    /// At least one child must hold
    Or(Vec<FilterExpr>),
    /// Raw SQL fragment with its own arguments
    Raw { sql: String, args: Vec<Value> },
}

impl FilterExpr {
    /// Whether the expression holds for every row: an AND group without a
    /// restricting child, or an OR group with such a child.
    pub(crate) fn matches_everything(&self) -> bool {
        match self {
            Self::And(children) => children.iter().all(Self::matches_everything),
            Self::Or(children) => children.iter().any(Self::matches_everything),
            _ => false,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
        }
    }
}

impl Q {
    fn compare<V: ToValue>(column: &str, op: CompareOp, value: V) -> Self {
        Self {
            expr: FilterExpr::Comparison {
                column: column.to_string(),
                op,
                value: value.to_value(),
            },
        }
    }

    /// Creates an equality filter (column = value).
    pub fn eq<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Creates an inequality filter (column != value).
    pub fn ne<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// Creates a greater-than filter (column > value).
    pub fn gt<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// Creates a greater-than-or-equal filter (column >= value).
    pub fn gte<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Gte, value)
    }

    /// Creates a less-than filter (column < value).
    pub fn lt<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// Creates a less-than-or-equal filter (column <= value).
    pub fn lte<V: ToValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Lte, value)
    }

    /// Creates an IS NULL filter.
    pub fn is_null(column: &str) -> Self {
        Self {
            expr: FilterExpr::IsNull {
                column: column.to_string(),
            },
        }
    }

    /// Creates an IS NOT NULL filter.
    pub fn is_not_null(column: &str) -> Self {
        Self {
            expr: FilterExpr::IsNotNull {
                column: column.to_string(),
            },
        }
    }

    /// Creates an IN list filter. An empty list matches nothing.
    pub fn is_in<V, I>(column: &str, values: I) -> Self
    where
        V: ToValue,
        I: IntoIterator<Item = V>,
    {
        Self {
            expr: FilterExpr::InList {
                column: column.to_string(),
                values: values.into_iter().map(|v| v.to_value()).collect(),
            },
        }
    }

    /// Creates a LIKE filter. Use `%` for wildcard matching.
    pub fn like(column: &str, pattern: &str) -> Self {
        Self {
            expr: FilterExpr::Like {
                column: column.to_string(),
                pattern: pattern.to_string(),
            },
        }
    }

    /// Creates a raw SQL filter expression.
    ///
    /// **Warning**: pass values through `args`, never format them into `sql`.
    pub fn raw(sql: &str, args: Vec<Value>) -> Self {
        Self {
            expr: FilterExpr::Raw {
                sql: sql.to_string(),
                args,
            },
        }
    }

    /// All of `filters` must hold.
    pub fn and_all(filters: impl IntoIterator<Item = Self>) -> Self {
        Self {
            expr: FilterExpr::And(filters.into_iter().map(|q| q.expr).collect()),
        }
    }

    /// At least one of `filters` must hold.
    pub fn or_all(filters: impl IntoIterator<Item = Self>) -> Self {
        Self {
            expr: FilterExpr::Or(filters.into_iter().map(|q| q.expr).collect()),
        }
    }

    /// Combines this filter with another using AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let expr = match self.expr {
            FilterExpr::And(mut children) => {
                children.push(other.expr);
                FilterExpr::And(children)
            }
            expr => FilterExpr::And(vec![expr, other.expr]),
        };
        Self { expr }
    }

    /// Combines this filter with another using OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let expr = match self.expr {
            FilterExpr::Or(mut children) => {
                children.push(other.expr);
                FilterExpr::Or(children)
            }
            expr => FilterExpr::Or(vec![expr, other.expr]),
        };
        Self { expr }
    }

    /// Returns the internal filter expression.
    pub fn into_expr(self) -> FilterExpr {
        self.expr
    }

    /// Returns the internal filter expression by reference.
    pub const fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    /// Builds the SQL condition and its arguments.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut args = Vec::new();
        let sql = build_filter_expr(&self.expr, &mut args);
        (sql, args)
    }
}

impl From<Q> for FilterExpr {
    fn from(q: Q) -> Self {
        q.expr
    }
}

/// Quotes a column reference, one back-ticked segment per dotted part.
///
/// Names that already contain back-ticks or parentheses are taken verbatim,
/// semicolons are always removed.
pub fn quote_column(column: &str) -> String {
    let column = column.replace(';', "");
    if column.contains('`') || column.contains('(') {
        return column;
    }
    column
        .split('.')
        .map(|part| format!("`{}`", part.trim()))
        .collect::<Vec<_>>()
        .join(".")
}

fn build_group(
    children: &[FilterExpr],
    sep: &str,
    empty: &str,
    args: &mut Vec<Value>,
) -> String {
    if children.is_empty() {
        return empty.to_string();
    }
    children
        .iter()
        .map(|child| {
            let sql = build_filter_expr(child, args);
            match child {
                FilterExpr::And(c) | FilterExpr::Or(c) if c.len() > 1 => format!("({sql})"),
                FilterExpr::Raw { .. } => format!("({sql})"),
                _ => sql,
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

/// Builds SQL from a filter expression, appending its arguments.
pub(crate) fn build_filter_expr(expr: &FilterExpr, args: &mut Vec<Value>) -> String {
    match expr {
        FilterExpr::Comparison { column, op, value } => {
            args.push(value.clone());
            format!("{} {op} ?", quote_column(column))
        }
        FilterExpr::IsNull { column } => format!("{} IS NULL", quote_column(column)),
        FilterExpr::IsNotNull { column } => format!("{} IS NOT NULL", quote_column(column)),
        FilterExpr::InList { values, .. } if values.is_empty() => "1 = 0".to_string(),
        FilterExpr::InList { column, values } => {
            args.extend(values.iter().cloned());
            let placeholders = vec!["?"; values.len()].join(", ");
            format!("{} IN ({placeholders})", quote_column(column))
        }
        FilterExpr::Like { column, pattern } => {
            args.push(Value::Text(pattern.clone()));
            format!("{} LIKE ?", quote_column(column))
        }
        FilterExpr::And(children) => build_group(children, " AND ", "1 = 1", args),
        FilterExpr::Or(children) => build_group(children, " OR ", "1 = 0", args),
        FilterExpr::Raw { sql, args: raw } => {
            args.extend(raw.iter().cloned());
            sql.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_eq() {
        let q = Q::eq("status", "active");
        let (sql, params) = q.build();
        assert_eq!(sql, "`status` = ?");
        assert_eq!(params, vec![Value::Text("active".into())]);
    }

    #[test]
    fn test_and_combination() {
        let q = Q::eq("status", "active").and(Q::gt("age", 18)).and(Q::lte("age", 65));
        let (sql, params) = q.build();
        assert_eq!(sql, "`status` = ? AND `age` > ? AND `age` <= ?");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_nested_groups() {
        let q = Q::eq("status", "active").and(Q::gt("age", 18).or(Q::eq("verified", true)));
        let (sql, params) = q.build();
        assert_eq!(sql, "`status` = ? AND (`age` > ? OR `verified` = ?)");
        assert_eq!(
            params,
            vec![Value::Text("active".into()), Value::Int(18), Value::Bool(true)]
        );
    }

    #[test]
    fn test_in_list() {
        let q = Q::is_in("status", ["active", "pending"]);
        let (sql, params) = q.build();
        assert_eq!(sql, "`status` IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let q = Q::is_in("id", Vec::<i64>::new());
        let (sql, params) = q.build();
        assert_eq!(sql, "1 = 0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_like_and_raw() {
        let q = Q::like("email", "%@example.com").and(Q::raw("score > ? * 2", vec![Value::Int(3)]));
        let (sql, params) = q.build();
        assert_eq!(sql, "`email` LIKE ? AND (score > ? * 2)");
        assert_eq!(
            params,
            vec![Value::Text("%@example.com".into()), Value::Int(3)]
        );
    }

    #[test]
    fn test_quote_column() {
        assert_eq!(quote_column("user.id"), "`user`.`id`");
        assert_eq!(quote_column("`user`.`id`"), "`user`.`id`");
        assert_eq!(quote_column("name;"), "`name`");
        assert_eq!(quote_column("COUNT(*)"), "COUNT(*)");
    }

    #[test]
    fn test_is_null() {
        let (sql, params) = Q::is_null("deleted_at").build();
        assert_eq!(sql, "`deleted_at` IS NULL");
        assert!(params.is_empty());
    }
}
