//! Column values and the Rust-type to column-type mapping.
//!
//! [`Value`] is what flows between records and the driver: record fields are
//! encoded into it before binding and decoded from it after a row is read.
//! [`FieldType`] is the per-type half of the model reflector: it fixes the
//! column affinity of every supported field type at compile time.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, Result};

/// A value bound to, or read from, a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean, stored as `tinyint(1)`.
    Bool(bool),
    /// Any integer; unsigned values are stored as signed.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Text.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Structured JSON payload.
    Json(serde_json::Value),
}

impl Value {
    /// Returns true for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the textual identity used when comparing primary keys.
    ///
    /// NULL and the zero value of integer and string keys render as the empty
    /// string, which means "not set".
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Null | Self::Int(0) => String::new(),
            Self::Int(i) => i.to_string(),
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Timestamp(t) => t.to_rfc3339(),
            Self::Json(j) => j.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

/// Column type affinity derived from a field's Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Bounded text, `VARCHAR(255)`.
    Text,
    /// 8 and 16 bit signed integers, `SMALLINT`.
    SmallInt,
    /// Every other integer, `INT`.
    Integer,
    /// `DOUBLE`.
    Float,
    /// `tinyint(1)`.
    Bool,
    /// `timestamp`.
    Timestamp,
    /// Sequences, maps and serde structs, `JSON`.
    Json,
    /// String primary key.
    PkString,
    /// Auto-increment integer primary key.
    PkInt,
}

impl Affinity {
    /// Returns the primary-key affinity for this field affinity, if any.
    #[must_use]
    pub const fn as_primary_key(self) -> Option<Self> {
        match self {
            Self::SmallInt | Self::Integer | Self::PkInt => Some(Self::PkInt),
            Self::Text | Self::PkString => Some(Self::PkString),
            _ => None,
        }
    }

    /// Returns true for affinities decoded as integers.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::SmallInt | Self::Integer | Self::PkInt)
    }
}

/// Converts a Rust value into a bindable [`Value`].
pub trait ToValue {
    /// Encodes the value.
    fn to_value(&self) -> Value;
}

/// A Rust type that can be stored in a mapped column.
///
/// Decoding NULL yields the type's zero value; callers that must reject NULL
/// check nullability before decoding.
pub trait FieldType: ToValue + Default + Send + Sync + 'static {
    /// Column affinity of the type.
    const AFFINITY: Affinity;
    /// Whether the type itself admits NULL (`Option<T>`).
    const NULLABLE: bool = false;

    /// Decodes a column value into the type.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, found: &Value) -> OrmError {
    OrmError::Decode {
        column: expected.to_string(),
        message: format!("cannot decode {} value into {expected}", found.kind()),
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

macro_rules! integer_field {
    ($($ty:ty => $affinity:ident),* $(,)?) => {$(
        impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }
        }

        impl FieldType for $ty {
            const AFFINITY: Affinity = Affinity::$affinity;

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(Self::default()),
                    Value::Int(i) => Self::try_from(i).map_err(|_| OrmError::Decode {
                        column: stringify!($ty).to_string(),
                        message: format!("{i} is out of range"),
                    }),
                    Value::Bool(b) => Ok(Self::from(b)),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }
    )*};
}

integer_field! {
    i8 => SmallInt,
    i16 => SmallInt,
    i32 => Integer,
    i64 => Integer,
    u8 => Integer,
    u16 => Integer,
    u32 => Integer,
}

// The column is signed; unsigned 64 bit values keep their bit pattern.
macro_rules! wide_unsigned_field {
    ($($ty:ty),*) => {$(
        impl ToValue for $ty {
            #[allow(clippy::cast_possible_wrap)]
            fn to_value(&self) -> Value {
                Value::Int(*self as i64)
            }
        }

        impl FieldType for $ty {
            const AFFINITY: Affinity = Affinity::Integer;

            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(0),
                    Value::Int(i) => Ok(i as $ty),
                    Value::Bool(b) => Ok(Self::from(b)),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }
    )*};
}

wide_unsigned_field!(u64, usize);

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FieldType for f64 {
    const AFFINITY: Affinity = Affinity::Float;

    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0.0),
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as Self),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl FieldType for f32 {
    const AFFINITY: Affinity = Affinity::Float;

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as Self)
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FieldType for bool {
    const AFFINITY: Affinity = Affinity::Bool;

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FieldType for String {
    const AFFINITY: Affinity = Affinity::Text;

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Text(s) => Ok(s),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

impl FieldType for DateTime<Utc> {
    const AFFINITY: Affinity = Affinity::Timestamp;

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Timestamp(t) => Ok(t),
            Value::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| OrmError::Decode {
                    column: "DateTime<Utc>".to_string(),
                    message: e.to_string(),
                }),
            other => Err(mismatch("DateTime<Utc>", &other)),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToValue::to_value)
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const AFFINITY: Affinity = T::AFFINITY;
    const NULLABLE: bool = true;

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn encode_json<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(json) => Value::Json(json),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode JSON column, storing NULL");
            Value::Null
        }
    }
}

fn decode_json<T: DeserializeOwned + Default>(value: Value) -> Result<T> {
    match value {
        Value::Null | Value::Json(serde_json::Value::Null) => Ok(T::default()),
        Value::Json(json) => Ok(serde_json::from_value(json)?),
        Value::Text(s) if s.trim().is_empty() => Ok(T::default()),
        Value::Text(s) => Ok(serde_json::from_str(&s)?),
        other => Err(mismatch("JSON", &other)),
    }
}

impl<T> ToValue for Vec<T>
where
    T: Serialize,
{
    fn to_value(&self) -> Value {
        encode_json(self)
    }
}

impl<T> FieldType for Vec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    const AFFINITY: Affinity = Affinity::Json;

    fn from_value(value: Value) -> Result<Self> {
        decode_json(value)
    }
}

impl<V: Serialize, S> ToValue for HashMap<String, V, S> {
    fn to_value(&self) -> Value {
        encode_json(self)
    }
}

impl<V, S> FieldType for HashMap<String, V, S>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    const AFFINITY: Affinity = Affinity::Json;

    fn from_value(value: Value) -> Result<Self> {
        decode_json(value)
    }
}

impl<V: Serialize> ToValue for BTreeMap<String, V> {
    fn to_value(&self) -> Value {
        encode_json(self)
    }
}

impl<V> FieldType for BTreeMap<String, V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    const AFFINITY: Affinity = Affinity::Json;

    fn from_value(value: Value) -> Result<Self> {
        decode_json(value)
    }
}

impl ToValue for serde_json::Value {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }
}

impl FieldType for serde_json::Value {
    const AFFINITY: Affinity = Affinity::Json;

    fn from_value(value: Value) -> Result<Self> {
        decode_json(value)
    }
}

/// Stores any serde type in a `JSON` column.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct Profile { bio: String }
///
/// #[derive(Default, Record)]
/// struct User {
///     id: String,
///     profile: Json<Profile>,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwraps the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: Serialize> ToValue for Json<T> {
    fn to_value(&self) -> Value {
        encode_json(&self.0)
    }
}

impl<T> FieldType for Json<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    const AFFINITY: Affinity = Affinity::Json;

    fn from_value(value: Value) -> Result<Self> {
        decode_json(value).map(Json)
    }
}
