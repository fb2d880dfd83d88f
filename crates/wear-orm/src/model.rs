//! Model reflection: record descriptors resolved into cached table metadata.
//!
//! A record type describes itself once through [`Record::describe`] (normally
//! generated by `#[derive(Record)]`). [`resolve`] turns that descriptor into a
//! [`Model`], validates it, and memoizes the result per type for the lifetime
//! of the process.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{OrmError, Result};
use crate::value::{Affinity, FieldType, Value};

/// A record type mapped to a table.
///
/// Positions are the declaration index of the field inside the struct, the
/// same numbers handed out by [`Record::describe`].
pub trait Record: Default + Send + Sync + 'static {
    /// Returns the field-mapping descriptor for this type.
    fn describe() -> ModelDef;

    /// Returns the encoded value of the column field at `pos`.
    fn column_value(&self, pos: usize) -> Value;

    /// Decodes `value` into the column field at `pos`.
    fn set_column(&mut self, pos: usize, value: Value) -> Result<()>;

    /// Stores a related record into the join field at `pos`.
    ///
    /// Sequence fields append, singular fields are overwritten.
    fn attach(&mut self, pos: usize, related: Related) -> Result<()>;
}

/// A type-erased related record produced by the join assembler.
pub struct Related(Box<dyn Any + Send>);

impl Related {
    /// Wraps a related record.
    pub fn new<T: Send + 'static>(record: T) -> Self {
        Self(Box::new(record))
    }

    /// Recovers the related record as `T`.
    pub fn take<T: 'static>(self) -> Result<T> {
        self.0
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| OrmError::UnknownJoin(type_name::<T>().to_string()))
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Related(..)")
    }
}

/// Relation cardinality of a join field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Singular field (`T` or `Option<T>`), overwritten per row.
    One,
    /// Sequence field (`Vec<T>`), appended with de-duplication.
    Many,
}

/// Declarative descriptor of one column field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: &'static str,
    rust_type: &'static str,
    pos: usize,
    column: Option<String>,
    affinity: Affinity,
    nullable: bool,
    primary_key: bool,
}

impl FieldDef {
    /// Describes field `name` at `pos`, typed `T`.
    #[must_use]
    pub fn new<T: FieldType>(name: &'static str, pos: usize) -> Self {
        Self {
            name: name.trim_start_matches("r#"),
            rust_type: type_name::<T>(),
            pos,
            column: None,
            affinity: T::AFFINITY,
            nullable: T::NULLABLE,
            primary_key: false,
        }
    }

    /// Overrides the derived column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Marks the field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL in the column.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Declarative descriptor of one join field.
#[derive(Debug, Clone)]
pub struct JoinDef {
    name: &'static str,
    pos: usize,
    kind: JoinKind,
    type_id: TypeId,
}

impl JoinDef {
    /// Describes join field `name` at `pos` holding records of type `T`.
    #[must_use]
    pub fn new<T: 'static>(name: &'static str, pos: usize, kind: JoinKind) -> Self {
        Self {
            name: name.trim_start_matches("r#"),
            pos,
            kind,
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Declarative descriptor of a record type.
///
/// ```ignore
/// ModelDef::new("UserJoin")
///     .table("users")
///     .field(FieldDef::new::<String>("id", 0))
///     .field(FieldDef::new::<Option<String>>("nick", 1))
///     .join(JoinDef::new::<Address>("addresses", 2, JoinKind::Many))
/// ```
#[derive(Debug, Clone)]
pub struct ModelDef {
    struct_name: &'static str,
    table: Option<String>,
    fields: Vec<FieldDef>,
    joins: Vec<JoinDef>,
    link_only: bool,
}

impl ModelDef {
    /// Starts a descriptor for `struct_name`.
    #[must_use]
    pub const fn new(struct_name: &'static str) -> Self {
        Self {
            struct_name,
            table: None,
            fields: Vec::new(),
            joins: Vec::new(),
            link_only: false,
        }
    }

    /// Overrides the derived table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Adds a column field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a join field.
    #[must_use]
    pub fn join(mut self, join: JoinDef) -> Self {
        self.joins.push(join);
        self
    }

    /// Marks the model as a pure many-to-many link carrier.
    #[must_use]
    pub const fn link_only(mut self) -> Self {
        self.link_only = true;
        self
    }
}

/// Where a join lands inside the root record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSlot {
    /// Field name of the relation.
    pub name: &'static str,
    /// Field position of the relation.
    pub pos: usize,
    /// Cardinality.
    pub kind: JoinKind,
}

/// One mapped column.
#[derive(Debug)]
pub struct Field {
    name: &'static str,
    rust_type: &'static str,
    column: String,
    affinity: Affinity,
    nullable: bool,
    pos: usize,
    table: String,
    quoted: OnceLock<String>,
    quoted_select: OnceLock<String>,
    joined: OnceLock<String>,
}

impl Field {
    /// Rust field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Fully qualified Rust type of the field.
    #[must_use]
    pub const fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Column name.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Column affinity; primary keys report `PkInt` or `PkString`.
    #[must_use]
    pub const fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Whether NULL is accepted.
    #[must_use]
    pub const fn nullable(&self) -> bool {
        self.nullable
    }

    /// Field position inside the record.
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// `` `column` ``
    pub fn quoted(&self) -> &str {
        self.quoted.get_or_init(|| quote(&self.column))
    }

    /// Select-list form: `` `table`.`column` `` or `expr as `alias``.
    pub fn quoted_select(&self) -> &str {
        self.quoted_select.get_or_init(|| match split_alias(&self.column) {
            Some((expr, alias)) => format!("{} as {}", strip(expr), quote(alias)),
            None => self.joined().to_string(),
        })
    }

    /// Table-qualified form `` `table`.`column` ``.
    pub fn joined(&self) -> &str {
        self.joined
            .get_or_init(|| format!("{}.{}", quote(&self.table), quote(&self.column)))
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.column == other.column
            && self.affinity == other.affinity
            && self.nullable == other.nullable
            && self.pos == other.pos
            && self.table == other.table
    }
}

/// Resolved, immutable metadata for a record type.
#[derive(Debug)]
pub struct Model {
    struct_name: &'static str,
    table: String,
    fields: Vec<Field>,
    primary_key: Option<usize>,
    joins: HashMap<TypeId, JoinSlot>,
    link_only: bool,
    pub(crate) insert_columns: OnceLock<String>,
    pub(crate) select_list: OnceLock<String>,
    pub(crate) update_set: OnceLock<String>,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.struct_name == other.struct_name
            && self.table == other.table
            && self.fields == other.fields
            && self.primary_key == other.primary_key
            && self.joins == other.joins
            && self.link_only == other.link_only
    }
}

impl Model {
    /// Validates a descriptor and builds the model.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnsupportedPrimaryKey`] when the key field is not
    /// an integer or text column, or is nullable, and
    /// [`OrmError::Validation`] for more than one explicit key or a malformed
    /// column alias.
    pub fn from_def(def: ModelDef) -> Result<Self> {
        let table = def
            .table
            .unwrap_or_else(|| parse_name(def.struct_name));

        let explicit: Vec<usize> = def
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();
        if explicit.len() > 1 {
            return Err(OrmError::Validation(format!(
                "table ({table}) declares more than one primary key"
            )));
        }

        let mut fields = Vec::with_capacity(def.fields.len());
        for f in def.fields {
            let column = f.column.unwrap_or_else(|| parse_name(f.name));
            if column.to_ascii_lowercase().matches(" as ").count() > 1 {
                return Err(OrmError::Validation(format!(
                    "invalid column name ({column})"
                )));
            }
            fields.push(Field {
                name: f.name,
                rust_type: f.rust_type,
                column,
                affinity: f.affinity,
                nullable: f.nullable,
                pos: f.pos,
                table: table.clone(),
                quoted: OnceLock::new(),
                quoted_select: OnceLock::new(),
                joined: OnceLock::new(),
            });
        }

        let primary_key = explicit
            .first()
            .copied()
            .or_else(|| fields.iter().position(|f| f.column == "id"));
        if let Some(idx) = primary_key {
            let field = &mut fields[idx];
            match field.affinity.as_primary_key() {
                Some(affinity) if !field.nullable => field.affinity = affinity,
                _ => {
                    return Err(OrmError::UnsupportedPrimaryKey {
                        table,
                        field: field.name.to_string(),
                    })
                }
            }
        }

        let joins = def
            .joins
            .into_iter()
            .map(|j| {
                (
                    j.type_id,
                    JoinSlot {
                        name: j.name,
                        pos: j.pos,
                        kind: j.kind,
                    },
                )
            })
            .collect();

        Ok(Self {
            struct_name: def.struct_name,
            table,
            fields,
            primary_key,
            joins,
            link_only: def.link_only,
            insert_columns: OnceLock::new(),
            select_list: OnceLock::new(),
            update_set: OnceLock::new(),
        })
    }

    /// Rust struct name.
    #[must_use]
    pub const fn struct_name(&self) -> &'static str {
        self.struct_name
    }

    /// Table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Primary key field, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Field> {
        self.primary_key.map(|i| &self.fields[i])
    }

    /// Primary key field, failing when the model has none.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MissingPrimaryKey`].
    pub fn require_primary_key(&self) -> Result<&Field> {
        self.primary_key()
            .ok_or_else(|| OrmError::MissingPrimaryKey(self.table.clone()))
    }

    /// Whether the primary key is an auto-increment integer.
    #[must_use]
    pub fn has_int_pk(&self) -> bool {
        self.primary_key()
            .is_some_and(|f| f.affinity == Affinity::PkInt)
    }

    /// Where a related type lands inside this model, if declared.
    #[must_use]
    pub fn join_slot(&self, related: TypeId) -> Option<&JoinSlot> {
        self.joins.get(&related)
    }

    /// Whether this model is a pure many-to-many link carrier.
    #[must_use]
    pub const fn is_link_only(&self) -> bool {
        self.link_only
    }

    /// Field by column name.
    #[must_use]
    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Resolves a column allow-list into fields, in declaration order.
    ///
    /// An empty list selects every field; the primary key is always kept.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidField`] for a name that is not a column.
    pub fn select_fields(&self, columns: &[String]) -> Result<Vec<&Field>> {
        if columns.is_empty() {
            return Ok(self.fields.iter().collect());
        }
        if let Some(unknown) = columns.iter().find(|c| self.field_by_column(c).is_none()) {
            return Err(OrmError::InvalidField(unknown.clone()));
        }
        Ok(self
            .fields
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                Some(*i) == self.primary_key || columns.iter().any(|c| *c == f.column)
            })
            .map(|(_, f)| f)
            .collect())
    }

    /// Every field except the primary key.
    pub fn fields_no_pk(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != self.primary_key)
            .map(|(_, f)| f)
    }
}

fn cache() -> &'static RwLock<HashMap<TypeId, Arc<Model>>> {
    static MODELS: OnceLock<RwLock<HashMap<TypeId, Arc<Model>>>> = OnceLock::new();
    MODELS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolves the model of `T`, building and caching it on first use.
///
/// Concurrent first resolutions may each build a model; the first one
/// inserted wins and every caller receives it.
///
/// # Errors
///
/// Returns the validation errors of [`Model::from_def`].
pub fn resolve<T: Record>() -> Result<Arc<Model>> {
    let key = TypeId::of::<T>();
    {
        let models = cache().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = models.get(&key) {
            return Ok(Arc::clone(model));
        }
    }

    let model = Arc::new(Model::from_def(T::describe())?);
    let mut models = cache().write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(models.entry(key).or_insert(model)))
}

/// Returns the table-qualified quoted column of `T`'s field `field`.
///
/// Useful to disambiguate predicates over joined tables:
/// `Q::eq(&column_name::<User>("id")?, 5)`.
///
/// # Errors
///
/// Returns [`OrmError::InvalidField`] when `field` is not a column field.
pub fn column_name<T: Record>(field: &str) -> Result<String> {
    let model = resolve::<T>()?;
    model
        .fields()
        .iter()
        .find(|f| f.name() == field || f.column() == field)
        .map(|f| f.joined().to_string())
        .ok_or_else(|| OrmError::InvalidField(field.to_string()))
}

pub(crate) fn strip(ident: &str) -> String {
    ident.replace([';', '`'], "")
}

/// Back-tick quotes an identifier after stripping back-ticks and semicolons.
#[must_use]
pub fn quote(ident: &str) -> String {
    format!("`{}`", strip(ident))
}

fn split_alias(column: &str) -> Option<(&str, &str)> {
    let idx = column.to_ascii_lowercase().find(" as ")?;
    Some((&column[..idx], &column[idx + 4..]))
}

/// Converts a camel-case identifier to lower snake case.
///
/// Runs of capitals are treated as one acronym: `JSONString` becomes
/// `json_string` and `MyStringJSON` becomes `my_string_json`. Names that are
/// already snake case are returned unchanged.
#[must_use]
pub fn parse_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() * 2);
    let mut upper_run = 0usize;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i != 0 && upper_run == 0 {
                out.push('_');
            }
            upper_run += 1;
            continue;
        }
        if upper_run > 1 {
            // acronym before a camel-case word: all but the last capital
            out.extend(chars[i - upper_run..i - 1].iter().flat_map(|c| c.to_lowercase()));
            out.push('_');
        }
        if upper_run > 0 {
            out.extend(chars[i - 1].to_lowercase());
        }
        out.push(c);
        upper_run = 0;
    }
    out.extend(
        chars[chars.len() - upper_run..]
            .iter()
            .flat_map(|c| c.to_lowercase()),
    );
    out
}
