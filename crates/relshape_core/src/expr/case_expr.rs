use std::fmt;

use super::SqlExpr;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct WhenThen {
    pub when: SqlExpr,
    pub then: SqlExpr,
}

impl WhenThen {
    pub fn new(when: impl Into<SqlExpr>, then: impl Into<SqlExpr>) -> Self {
        WhenThen {
            when: when.into(),
            then: then.into(),
        }
    }
}

impl fmt::Display for WhenThen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WHEN {} THEN {}", self.when, self.then)
    }
}

/// A CASE expression.
///
/// With an operand this is the simple form (`CASE x WHEN 1 THEN ..`), without
/// it's the searched form (`CASE WHEN x = 1 THEN ..`).
#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpr {
    pub operand: Option<Box<SqlExpr>>,
    pub cases: Vec<WhenThen>,
    pub else_expr: Option<Box<SqlExpr>>,
    pub datatype: DataType,
}

impl CaseExpr {
    pub fn is_searched(&self) -> bool {
        self.operand.is_none()
    }
}

impl fmt::Display for CaseExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CASE")?;
        if let Some(operand) = &self.operand {
            write!(f, " {operand}")?;
        }
        for case in &self.cases {
            write!(f, " {case}")?;
        }
        if let Some(else_expr) = &self.else_expr {
            write!(f, " ELSE {else_expr}")?;
        }
        write!(f, " END")
    }
}
