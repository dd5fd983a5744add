use std::fmt;

use super::SqlExpr;
use super::binary_expr::BinaryOperator;

/// Multi-column row comparison, `(a, b) < (c, d)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowValueExpr {
    pub op: BinaryOperator,
    pub columns: Vec<SqlExpr>,
    pub values: Vec<SqlExpr>,
}

fn write_row(f: &mut fmt::Formatter<'_>, exprs: &[SqlExpr]) -> fmt::Result {
    write!(f, "(")?;
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{expr}")?;
    }
    write!(f, ")")
}

impl fmt::Display for RowValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_row(f, &self.columns)?;
        write!(f, " {} ", self.op)?;
        write_row(f, &self.values)
    }
}
