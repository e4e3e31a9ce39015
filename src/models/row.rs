//! Decoded result rows.
//!
//! Drivers turn every result row into a [`Row`]: an ordered list of column
//! names paired with [`Value`]s. Callers map rows into their own records with
//! [`FromRow`], which is implemented for `Row` itself and for tuples of
//! [`FromValue`] types.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::sync::Arc;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Conversion from a column value into a Rust type.
pub trait FromValue: Sized {
    /// Returns a human-readable reason on mismatch; the caller adds the column.
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {}, found {}", expected, value.kind())
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Json(v) => Ok(v.to_string()),
            Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|e| e.to_string()),
            Value::Null => Err(mismatch("text", value)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Int(v) => Ok(*v),
            _ => Err(mismatch("int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| format!("{} does not fit in i32", wide))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            _ => Err(mismatch("float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(*v),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(mismatch("bytes", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| e.to_string()),
            Value::Null => Ok(serde_json::Value::Null),
            _ => Err(mismatch("json", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One decoded result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Rows of one result set share the same column list.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Decode the column at `idx`.
    pub fn try_get_at<T: FromValue>(&self, idx: usize) -> DbResult<T> {
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| DbError::ColumnNotFound(format!("index {}", idx)))?;
        T::from_value(value).map_err(|msg| DbError::decode(self.column_name(idx), msg))
    }

    /// Decode the column called `name`.
    pub fn try_get<T: FromValue>(&self, name: &str) -> DbResult<T> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))?;
        self.try_get_at(idx)
    }

    /// Decode the only column of a single-column row.
    pub fn single<T: FromValue>(&self) -> DbResult<T> {
        if self.len() != 1 {
            return Err(DbError::decode(
                self.columns.join(", "),
                format!("expected 1 column, got {}", self.len()),
            ));
        }
        self.try_get_at(0)
    }

    fn column_name(&self, idx: usize) -> String {
        self.columns
            .get(idx)
            .cloned()
            .unwrap_or_else(|| idx.to_string())
    }
}

/// Mapping from a decoded row into a caller-defined record.
///
/// ```ignore
/// struct Table {
///     schema: String,
///     name: String,
/// }
///
/// impl FromRow for Table {
///     fn from_row(row: &Row) -> DbResult<Self> {
///         Ok(Self {
///             schema: row.try_get("schemaname")?,
///             name: row.try_get("tablename")?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> DbResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(row.clone())
    }
}

/// Positional tuple decoding, one `FromValue` per column.
macro_rules! impl_from_row_tuple {
    ($($idx:tt => $t:ident),+) => {
        impl<$($t: FromValue),+> FromRow for ($($t,)+) {
            fn from_row(row: &Row) -> DbResult<Self> {
                Ok(($(row.try_get_at::<$t>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(0 => A);
impl_from_row_tuple!(0 => A, 1 => B);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C);
impl_from_row_tuple!(0 => A, 1 => B, 2 => C, 3 => D);

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        Row::new(columns, values)
    }

    #[test]
    fn test_try_get_by_name_is_case_insensitive() {
        let r = row(&["Schemaname", "tablename"], vec!["s1".into(), "t1".into()]);
        let schema: String = r.try_get("schemaname").unwrap();
        assert_eq!(schema, "s1");
        assert!(matches!(
            r.try_get::<String>("missing"),
            Err(DbError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_null_requires_option() {
        let r = row(&["a"], vec![Value::Null]);
        assert!(matches!(r.try_get::<String>("a"), Err(DbError::Decode { .. })));
        assert_eq!(r.try_get::<Option<String>>("a").unwrap(), None);
    }

    #[test]
    fn test_string_accepts_scalars() {
        let r = row(&["n", "b"], vec![Value::Int(42), Value::Bool(true)]);
        assert_eq!(r.try_get::<String>("n").unwrap(), "42");
        assert_eq!(r.try_get::<String>("b").unwrap(), "true");
    }

    #[test]
    fn test_i32_range_checked() {
        let r = row(&["n"], vec![Value::Int(i64::MAX)]);
        let err = r.try_get::<i32>("n").unwrap_err();
        assert!(err.to_string().contains("does not fit in i32"));
    }

    #[test]
    fn test_single_rejects_multiple_columns() {
        let r = row(&["a", "b"], vec!["x".into(), "y".into()]);
        let err = r.single::<String>().unwrap_err();
        assert!(err.to_string().contains("expected 1 column, got 2"));
    }

    #[test]
    fn test_tuple_from_row() {
        let r = row(
            &["schemaname", "tablename", "rows"],
            vec!["schema1".into(), "table1".into(), Value::Int(7)],
        );
        let (schema, table, rows): (String, String, i64) = FromRow::from_row(&r).unwrap();
        assert_eq!(schema, "schema1");
        assert_eq!(table, "table1");
        assert_eq!(rows, 7);
    }

    #[test]
    fn test_json_from_text() {
        let r = row(&["doc"], vec![r#"{"a":1}"#.into()]);
        let doc: serde_json::Value = r.single().unwrap();
        assert_eq!(doc["a"], 1);
    }
}
