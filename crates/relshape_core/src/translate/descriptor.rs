use std::fmt;

/// Identity of a method a query may call.
///
/// Matched against by translators. Descriptors are plain data resolved when
/// translators are registered, there's no runtime type introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub declaring_type: &'static str,
    /// Identity of the generic method definition if this is an instantiation
    /// of a generic method.
    pub generic_definition: Option<&'static str>,
    pub is_static: bool,
    /// Number of arguments, not counting the receiver. Zero for variadic
    /// methods.
    pub arity: usize,
}

impl OperationDescriptor {
    pub const fn instance(declaring_type: &'static str, name: &'static str, arity: usize) -> Self {
        OperationDescriptor {
            name,
            declaring_type,
            generic_definition: None,
            is_static: false,
            arity,
        }
    }

    pub const fn static_method(declaring_type: &'static str, name: &'static str, arity: usize) -> Self {
        OperationDescriptor {
            name,
            declaring_type,
            generic_definition: None,
            is_static: true,
            arity,
        }
    }

    pub const fn with_generic_definition(mut self, definition: &'static str) -> Self {
        self.generic_definition = Some(definition);
        self
    }

    /// If this descriptor names the same method as `other`, ignoring the
    /// declaring type.
    pub fn same_method(&self, other: &OperationDescriptor) -> bool {
        self.name == other.name && self.is_static == other.is_static && self.arity == other.arity
    }
}

impl fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)?;
        if let Some(def) = self.generic_definition {
            write!(f, " [{def}]")?;
        }
        Ok(())
    }
}

/// Identity of a member (property) a query may access.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberDescriptor {
    pub name: String,
    pub declaring_type: &'static str,
}

impl MemberDescriptor {
    pub fn new(declaring_type: &'static str, name: impl Into<String>) -> Self {
        MemberDescriptor {
            name: name.into(),
            declaring_type,
        }
    }
}

impl fmt::Display for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// Names of well known declaring types.
pub mod types {
    pub const OBJECT: &str = "Object";
    pub const STRING: &str = "String";
    pub const NULLABLE: &str = "Nullable";
    pub const ENUM: &str = "Enum";
    pub const MATH: &str = "Math";
    pub const ENUMERABLE: &str = "Enumerable";
    pub const DB_FUNCTIONS: &str = "DbFunctions";
    pub const BYTES: &str = "Bytes";
    pub const NUMBER: &str = "Number";
    pub const BOOLEAN: &str = "Boolean";
}

/// Well known methods with built in translations.
pub mod methods {
    use super::{OperationDescriptor, types};

    pub const SEQUENCE_EQUAL_DEFINITION: &str = "Enumerable.SequenceEqual<T>";

    pub const BYTES_SEQUENCE_EQUAL: OperationDescriptor =
        OperationDescriptor::static_method(types::ENUMERABLE, "SequenceEqual", 2)
            .with_generic_definition(SEQUENCE_EQUAL_DEFINITION);

    pub const STRING_IS_NULL_OR_EMPTY: OperationDescriptor =
        OperationDescriptor::static_method(types::STRING, "IsNullOrEmpty", 1);
    pub const STRING_CONCAT: OperationDescriptor =
        OperationDescriptor::static_method(types::STRING, "Concat", 0);
    pub const STRING_COMPARE: OperationDescriptor =
        OperationDescriptor::static_method(types::STRING, "Compare", 2);
    pub const STRING_TO_UPPER: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "ToUpper", 0);
    pub const STRING_TO_LOWER: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "ToLower", 0);
    pub const STRING_TRIM: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "Trim", 0);
    pub const STRING_CONTAINS: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "Contains", 1);
    pub const STRING_STARTS_WITH: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "StartsWith", 1);
    pub const STRING_ENDS_WITH: OperationDescriptor =
        OperationDescriptor::instance(types::STRING, "EndsWith", 1);

    pub const COMPARE_TO: OperationDescriptor =
        OperationDescriptor::instance(types::OBJECT, "CompareTo", 1);
    pub const EQUALS: OperationDescriptor = OperationDescriptor::instance(types::OBJECT, "Equals", 1);
    pub const STATIC_EQUALS: OperationDescriptor =
        OperationDescriptor::static_method(types::OBJECT, "Equals", 2);

    pub const HAS_FLAG: OperationDescriptor = OperationDescriptor::instance(types::ENUM, "HasFlag", 1);

    pub const ROW_LESS_THAN: OperationDescriptor =
        OperationDescriptor::static_method(types::DB_FUNCTIONS, "LessThan", 0);
    pub const ROW_LESS_THAN_OR_EQUAL: OperationDescriptor =
        OperationDescriptor::static_method(types::DB_FUNCTIONS, "LessThanOrEqual", 0);
    pub const ROW_GREATER_THAN: OperationDescriptor =
        OperationDescriptor::static_method(types::DB_FUNCTIONS, "GreaterThan", 0);
    pub const ROW_GREATER_THAN_OR_EQUAL: OperationDescriptor =
        OperationDescriptor::static_method(types::DB_FUNCTIONS, "GreaterThanOrEqual", 0);
    pub const COLLATE: OperationDescriptor =
        OperationDescriptor::static_method(types::DB_FUNCTIONS, "Collate", 2);

    pub const MATH_ABS: OperationDescriptor = OperationDescriptor::static_method(types::MATH, "Abs", 1);
    pub const MATH_CEILING: OperationDescriptor =
        OperationDescriptor::static_method(types::MATH, "Ceiling", 1);
    pub const MATH_FLOOR: OperationDescriptor =
        OperationDescriptor::static_method(types::MATH, "Floor", 1);
    pub const MATH_ROUND: OperationDescriptor =
        OperationDescriptor::static_method(types::MATH, "Round", 1);
}
