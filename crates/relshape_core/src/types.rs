use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumeration type backed by an integral type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub underlying: Box<DataType>,
}

/// Logical data type of a value flowing through a query.
///
/// Nullability is part of the type (`Nullable(..)`) the same way it is for the
/// runtime types the front end describes. SQL nodes mostly care about the
/// stripped type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type of an untyped null literal.
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float64,
    Utf8,
    Binary,
    Enum(EnumType),
    Nullable(Box<DataType>),
    /// Variable length list, used for array parameters.
    List(Box<DataType>),
    /// Fixed arity tuple, used for row values.
    Tuple(Vec<DataType>),
}

impl DataType {
    pub fn nullable(self) -> DataType {
        match self {
            Self::Nullable(_) | Self::Null => self,
            other => Self::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_) | Self::Null)
    }

    /// Get the type with any nullable wrapper removed.
    pub fn strip_nullable(&self) -> &DataType {
        match self {
            Self::Nullable(inner) => inner.strip_nullable(),
            other => other,
        }
    }

    /// Get the primitive type backing this type, stripping nullability and
    /// enum wrappers.
    pub fn underlying(&self) -> &DataType {
        match self.strip_nullable() {
            Self::Enum(e) => e.underlying.underlying(),
            other => other,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self.strip_nullable(),
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral() || matches!(self.strip_nullable(), Self::Float64)
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self.strip_nullable(), Self::Utf8)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.strip_nullable(), Self::Binary)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.strip_nullable(), Self::Boolean)
    }

    /// Check if values of two types can ever be compared for equality.
    ///
    /// Types unify when they're the same after stripping nullability. An
    /// untyped null unifies with everything.
    pub fn unifies_with(&self, other: &DataType) -> bool {
        let left = self.strip_nullable();
        let right = other.strip_nullable();

        if matches!(left, Self::Null) || matches!(right, Self::Null) {
            return true;
        }

        left == right
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Binary => write!(f, "Binary"),
            Self::Enum(e) => write!(f, "{}({})", e.name, e.underlying),
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Tuple(types) => {
                write!(f, "(")?;
                for (idx, typ) in types.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{typ}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> DataType {
        DataType::Enum(EnumType {
            name: "Flags".to_string(),
            underlying: Box::new(DataType::Int32),
        })
    }

    #[test]
    fn strip_nested_nullable() {
        let dt = DataType::Nullable(Box::new(DataType::Nullable(Box::new(DataType::Int32))));
        assert_eq!(&DataType::Int32, dt.strip_nullable());
    }

    #[test]
    fn nullable_is_idempotent() {
        let dt = DataType::Utf8.nullable().nullable();
        assert_eq!(DataType::Nullable(Box::new(DataType::Utf8)), dt);
    }

    #[test]
    fn enum_underlying() {
        assert_eq!(&DataType::Int32, flags().nullable().underlying());
    }

    #[test]
    fn unify() {
        assert!(DataType::Int32.unifies_with(&DataType::Int32.nullable()));
        assert!(DataType::Null.unifies_with(&DataType::Utf8));
        assert!(!DataType::Int32.unifies_with(&DataType::Utf8));
        assert!(!flags().unifies_with(&DataType::Int32));
    }
}
