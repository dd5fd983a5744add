use std::fmt;
use std::hash::{Hash, Hasher};

use relshape_error::{DbError, Result};
use serde::Serialize;

use crate::types::DataType;

/// A single owned value.
///
/// Used for constants in SQL trees, parameter values, and values read from
/// driver rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the data type of this value.
    ///
    /// Lists take the type of their first non-null element.
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::Binary(_) => DataType::Binary,
            Self::List(vals) => {
                let inner = vals
                    .iter()
                    .find(|v| !v.is_null())
                    .map(|v| v.datatype())
                    .unwrap_or(DataType::Null);
                DataType::List(Box::new(inner))
            }
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            other => Err(DbError::new("Not a bool").with_field("value", other.to_string())),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        Ok(match self {
            Self::Int8(v) => *v as i64,
            Self::Int16(v) => *v as i64,
            Self::Int32(v) => *v as i64,
            Self::Int64(v) => *v,
            other => {
                return Err(DbError::new("Not an integer").with_field("value", other.to_string()));
            }
        })
    }

    pub fn try_as_usize(&self) -> Result<usize> {
        let v = self.try_as_i64()?;
        usize::try_from(v)
            .map_err(|_| DbError::new("Value cannot be negative").with_field("value", v))
    }

    pub fn try_as_str(&self) -> Result<&str> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(DbError::new("Not a string").with_field("value", other.to_string())),
        }
    }

    pub fn try_into_string(self) -> Result<String> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(DbError::new("Not a string").with_field("value", other.to_string())),
        }
    }

    pub fn try_as_list(&self) -> Result<&[ScalarValue]> {
        match self {
            Self::List(vals) => Ok(vals),
            other => Err(DbError::new("Not a list").with_field("value", other.to_string())),
        }
    }

    /// Equality used for identifying rows.
    ///
    /// Unlike SQL equality, null is equal to null. Floats compare by bit
    /// pattern so that equality agrees with `hash_identity`.
    pub fn identity_eq(&self, other: &ScalarValue) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.identity_eq(b))
            }
            (a, b) => a == b,
        }
    }

    /// Hash consistent with `identity_eq`.
    pub fn hash_identity<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => (),
            Self::Boolean(v) => v.hash(state),
            Self::Int8(v) => v.hash(state),
            Self::Int16(v) => v.hash(state),
            Self::Int32(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Binary(v) => v.hash(state),
            Self::List(vals) => {
                vals.len().hash(state);
                for val in vals {
                    val.hash_identity(state);
                }
            }
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Binary(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Self::List(vals) => {
                write!(f, "[")?;
                for (idx, val) in vals.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{val}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i8> for ScalarValue {
    fn from(value: i8) -> Self {
        ScalarValue::Int8(value)
    }
}

impl From<i16> for ScalarValue {
    fn from(value: i16) -> Self {
        ScalarValue::Int16(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int32(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        ScalarValue::Binary(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}
