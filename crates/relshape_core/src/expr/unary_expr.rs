use std::fmt;

use super::SqlExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOperator,
    pub operand: Box<SqlExpr>,
}

impl fmt::Display for UnaryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            UnaryOperator::Not => write!(f, "NOT ({})", self.operand),
            UnaryOperator::Negate => write!(f, "-({})", self.operand),
            UnaryOperator::IsNull => write!(f, "{} IS NULL", self.operand),
            UnaryOperator::IsNotNull => write!(f, "{} IS NOT NULL", self.operand),
        }
    }
}
