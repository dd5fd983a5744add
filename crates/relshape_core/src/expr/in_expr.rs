use std::fmt;

use super::SqlExpr;
use super::literal_expr::ParameterExpr;

#[derive(Debug, Clone, PartialEq)]
pub enum InValues {
    /// Fixed list of values.
    List(Vec<SqlExpr>),
    /// Array valued parameter, expanded once the parameter value is known.
    Parameter(ParameterExpr),
}

/// `needle IN (values...)`
#[derive(Debug, Clone, PartialEq)]
pub struct InExpr {
    pub needle: Box<SqlExpr>,
    pub values: InValues,
    pub negated: bool,
}

impl fmt::Display for InExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = if self.negated { " NOT" } else { "" };
        match &self.values {
            InValues::List(values) => {
                write!(f, "{}{not} IN (", self.needle)?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
            InValues::Parameter(param) => write!(f, "{}{not} IN ({param})", self.needle),
        }
    }
}
