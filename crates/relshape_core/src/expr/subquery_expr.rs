use std::fmt;

use super::select_expr::SelectExpr;
use crate::types::DataType;

/// `[NOT] EXISTS (subquery)`
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsExpr {
    pub subquery: Box<SelectExpr>,
    pub negated: bool,
}

impl fmt::Display for ExistsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "NOT ")?;
        }
        write!(f, "EXISTS ({})", self.subquery)
    }
}

/// Subquery producing a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub subquery: Box<SelectExpr>,
    pub datatype: DataType,
}

impl fmt::Display for SubqueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.subquery)
    }
}
