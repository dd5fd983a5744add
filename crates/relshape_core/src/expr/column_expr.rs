use std::fmt;

use crate::types::DataType;

/// Identifier for a select's scope.
///
/// Every select in a query gets a distinct scope from the compilation context.
/// Columns point back at the select owning their table through the scope
/// rather than holding a reference to the select itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning reference to a table in a select's table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Scope of the select holding the table.
    pub scope: ScopeId,
    /// Index of the table within that select.
    pub table_idx: usize,
}

impl TableRef {
    pub const fn new(scope: ScopeId, table_idx: usize) -> Self {
        TableRef { scope, table_idx }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.table_idx)
    }
}

/// Reference to a column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnExpr {
    pub table: TableRef,
    /// Column name in the base table, or the projection alias when the table
    /// is a derived table.
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
}

impl ColumnExpr {
    pub fn datatype(&self) -> DataType {
        if self.nullable {
            self.datatype.clone().nullable()
        } else {
            self.datatype.clone()
        }
    }
}

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}
