use std::fmt;

use super::SqlExpr;
use super::select_expr::OrderingExpr;

/// `ROW_NUMBER() OVER (PARTITION BY .. ORDER BY ..)`
///
/// Only produced when limiting rows of a collection joined into its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct RowNumberExpr {
    pub partitions: Vec<SqlExpr>,
    pub orderings: Vec<OrderingExpr>,
}

impl fmt::Display for RowNumberExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROW_NUMBER() OVER (")?;
        if !self.partitions.is_empty() {
            write!(f, "PARTITION BY ")?;
            for (idx, part) in self.partitions.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{part}")?;
            }
        }
        if !self.orderings.is_empty() {
            write!(f, " ORDER BY ")?;
            for (idx, ordering) in self.orderings.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{ordering}")?;
            }
        }
        write!(f, ")")
    }
}
