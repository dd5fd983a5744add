use std::fmt;

use super::SqlExpr;

/// `input LIKE pattern [ESCAPE 'c']`
#[derive(Debug, Clone, PartialEq)]
pub struct LikeExpr {
    pub input: Box<SqlExpr>,
    pub pattern: Box<SqlExpr>,
    pub escape: Option<char>,
}

impl fmt::Display for LikeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} LIKE {}", self.input, self.pattern)?;
        if let Some(escape) = self.escape {
            write!(f, " ESCAPE '{escape}'")?;
        }
        Ok(())
    }
}
