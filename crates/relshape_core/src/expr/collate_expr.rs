use std::fmt;

use super::SqlExpr;

/// Forces comparison of the operand under a named collation.
#[derive(Debug, Clone, PartialEq)]
pub struct CollateExpr {
    pub operand: Box<SqlExpr>,
    pub collation: String,
}

impl fmt::Display for CollateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} COLLATE {}", self.operand, self.collation)
    }
}
