use std::fmt;

use super::SqlExpr;
use crate::types::DataType;

/// Call of a SQL function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub name: String,
    pub args: Vec<SqlExpr>,
    pub datatype: DataType,
    /// If this is an aggregate function (COUNT, SUM, ...).
    pub is_aggregate: bool,
}

impl fmt::Display for FunctionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        if self.args.is_empty() && self.is_aggregate {
            write!(f, "*")?;
        }
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}
