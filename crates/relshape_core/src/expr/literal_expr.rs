use std::fmt;

use crate::scalar::ScalarValue;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantExpr {
    pub value: ScalarValue,
    pub datatype: DataType,
}

impl ConstantExpr {
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

impl fmt::Display for ConstantExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ScalarValue::Utf8(s) => write!(f, "'{s}'"),
            other => write!(f, "{other}"),
        }
    }
}

/// Reference to a named query parameter.
///
/// Parameter values are only known at execution time, they're bound after the
/// command text has been produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterExpr {
    pub name: String,
    pub datatype: DataType,
    /// Element of an array parameter, set when an array parameter has been
    /// expanded into one placeholder per element.
    pub element: Option<usize>,
}

impl fmt::Display for ParameterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if let Some(idx) = self.element {
            write!(f, "[{idx}]")?;
        }
        Ok(())
    }
}
