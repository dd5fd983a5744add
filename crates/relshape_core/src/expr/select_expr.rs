use std::fmt;

use relshape_error::{DbError, Result};

use super::column_expr::{ColumnExpr, ScopeId, TableRef};
use super::{SqlExpr, and};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionExpr {
    pub expr: SqlExpr,
    /// Output name of the projection. Unique within a select (case
    /// insensitive).
    pub alias: String,
}

/// How a table joins to the tables before it.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinType {
    /// First table in the FROM clause.
    From,
    Cross,
    Inner(SqlExpr),
    LeftOuter(SqlExpr),
}

impl JoinType {
    pub fn condition(&self) -> Option<&SqlExpr> {
        match self {
            Self::Inner(cond) | Self::LeftOuter(cond) => Some(cond),
            Self::From | Self::Cross => None,
        }
    }

    pub fn condition_mut(&mut self) -> Option<&mut SqlExpr> {
        match self {
            Self::Inner(cond) | Self::LeftOuter(cond) => Some(cond),
            Self::From | Self::Cross => None,
        }
    }

    pub const fn is_left_outer(&self) -> bool {
        matches!(self, Self::LeftOuter(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Base {
        schema: Option<String>,
        name: String,
    },
    /// Subquery in the FROM clause.
    Derived(Box<SelectExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableExpr {
    pub alias: Option<String>,
    pub source: TableSource,
    pub join: JoinType,
}

impl TableExpr {
    pub fn as_derived(&self) -> Option<&SelectExpr> {
        match &self.source {
            TableSource::Derived(select) => Some(select),
            TableSource::Base { .. } => None,
        }
    }

    pub fn as_derived_mut(&mut self) -> Option<&mut SelectExpr> {
        match &mut self.source {
            TableSource::Derived(select) => Some(select),
            TableSource::Base { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderingExpr {
    pub expr: SqlExpr,
    pub ascending: bool,
}

impl fmt::Display for OrderingExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.ascending { "ASC" } else { "DESC" };
        write!(f, "{} {dir}", self.expr)
    }
}

/// A SELECT statement.
///
/// The select owns its tables. Columns reference tables through a
/// [`TableRef`] holding the select's scope and the index into `tables`, so
/// there are no back references from tables to selects.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub scope: ScopeId,
    pub projections: Vec<ProjectionExpr>,
    pub tables: Vec<TableExpr>,
    pub predicate: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub orderings: Vec<OrderingExpr>,
    pub limit: Option<SqlExpr>,
    pub offset: Option<SqlExpr>,
    pub distinct: bool,
    /// Expressions uniquely identifying a row produced by this select.
    ///
    /// Not rendered, used when planning collection joins. Empty if rows can't
    /// be identified.
    pub identifier: Vec<SqlExpr>,
}

impl SelectExpr {
    pub fn new(scope: ScopeId) -> Self {
        SelectExpr {
            scope,
            projections: Vec::new(),
            tables: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            having: None,
            orderings: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            identifier: Vec::new(),
        }
    }

    /// Add a table to the select, returning a reference to it.
    pub fn add_table(&mut self, alias: impl Into<String>, source: TableSource, join: JoinType) -> TableRef {
        let join = if self.tables.is_empty() {
            JoinType::From
        } else {
            join
        };
        self.tables.push(TableExpr {
            alias: Some(alias.into()),
            source,
            join,
        });
        TableRef::new(self.scope, self.tables.len() - 1)
    }

    pub fn table_ref(&self, idx: usize) -> TableRef {
        TableRef::new(self.scope, idx)
    }

    /// Add an expression to the projection list, returning its index.
    ///
    /// If a structurally equal expression is already projected, that index is
    /// returned instead. The alias is made unique within the projection list.
    pub fn add_projection(&mut self, expr: SqlExpr, alias: &str) -> usize {
        if let Some(idx) = self.projections.iter().position(|p| p.expr == expr) {
            return idx;
        }

        let alias = unique_projection_alias(&self.projections, alias);
        self.projections.push(ProjectionExpr { expr, alias });
        self.projections.len() - 1
    }

    pub fn add_predicate(&mut self, pred: SqlExpr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => and(existing, pred),
            None => pred,
        });
    }

    /// If joining something into this select would change its results
    /// without first pushing it into a subquery.
    pub fn requires_pushdown(&self) -> bool {
        self.distinct || self.limit.is_some() || self.offset.is_some() || !self.group_by.is_empty()
    }

    /// If this select is a plain scan of a single table.
    pub fn is_simple_scan(&self) -> bool {
        self.tables.len() == 1
            && matches!(self.tables[0].source, TableSource::Base { .. })
            && self.predicate.is_none()
            && self.group_by.is_empty()
            && self.having.is_none()
            && self.orderings.is_empty()
            && !self.requires_pushdown()
    }

    /// Get a reference to a column produced by the derived table at
    /// `table_idx` for the projection at `proj_idx`.
    pub fn derived_column(&self, table_idx: usize, proj_idx: usize) -> Result<ColumnExpr> {
        let table = self
            .tables
            .get(table_idx)
            .ok_or_else(|| DbError::internal("Missing table").with_field("idx", table_idx))?;
        let inner = table
            .as_derived()
            .ok_or_else(|| DbError::internal("Table is not a derived table"))?;
        let proj = inner
            .projections
            .get(proj_idx)
            .ok_or_else(|| DbError::internal("Missing projection").with_field("idx", proj_idx))?;

        Ok(ColumnExpr {
            table: self.table_ref(table_idx),
            name: proj.alias.clone(),
            datatype: proj.expr.datatype().strip_nullable().clone(),
            nullable: proj.expr.datatype().is_nullable() || table.join.is_left_outer(),
        })
    }

    /// Lift an expression valid inside the derived table at `table_idx` to an
    /// expression valid in this select.
    ///
    /// Constants and parameters don't reference the inner select and are
    /// returned as is. Everything else gets projected from the derived table.
    pub fn lift_expr(&mut self, table_idx: usize, expr: SqlExpr) -> Result<SqlExpr> {
        if matches!(expr, SqlExpr::Constant(_) | SqlExpr::Parameter(_)) {
            return Ok(expr);
        }

        let inner = self
            .tables
            .get_mut(table_idx)
            .and_then(|t| t.as_derived_mut())
            .ok_or_else(|| DbError::internal("Lifting through a table that isn't derived"))?;

        let proj_idx = match inner.projections.iter().position(|p| p.expr == expr) {
            Some(idx) => idx,
            None => {
                if inner.distinct {
                    return Err(DbError::internal(
                        "Cannot add a projection to a DISTINCT subquery",
                    )
                    .with_field("expr", expr.to_string()));
                }
                let alias = default_alias(&expr);
                inner.add_projection(expr, &alias)
            }
        };

        Ok(SqlExpr::Column(self.derived_column(table_idx, proj_idx)?))
    }

    pub fn lift_exprs(&mut self, table_idx: usize, exprs: Vec<SqlExpr>) -> Result<Vec<SqlExpr>> {
        exprs
            .into_iter()
            .map(|expr| self.lift_expr(table_idx, expr))
            .collect()
    }

    /// Visit every expression owned directly by this select.
    ///
    /// Does not descend into derived tables, but does include join
    /// conditions and the identifier.
    pub fn for_each_expr_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut SqlExpr) -> Result<()>,
    {
        for proj in &mut self.projections {
            f(&mut proj.expr)?;
        }
        for table in &mut self.tables {
            if let Some(cond) = table.join.condition_mut() {
                f(cond)?;
            }
        }
        if let Some(pred) = &mut self.predicate {
            f(pred)?;
        }
        for expr in &mut self.group_by {
            f(expr)?;
        }
        if let Some(having) = &mut self.having {
            f(having)?;
        }
        for ordering in &mut self.orderings {
            f(&mut ordering.expr)?;
        }
        if let Some(limit) = &mut self.limit {
            f(limit)?;
        }
        if let Some(offset) = &mut self.offset {
            f(offset)?;
        }
        for expr in &mut self.identifier {
            f(expr)?;
        }
        Ok(())
    }

    pub fn for_each_expr<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(&SqlExpr) -> Result<()>,
    {
        for proj in &self.projections {
            f(&proj.expr)?;
        }
        for table in &self.tables {
            if let Some(cond) = table.join.condition() {
                f(cond)?;
            }
        }
        if let Some(pred) = &self.predicate {
            f(pred)?;
        }
        for expr in &self.group_by {
            f(expr)?;
        }
        if let Some(having) = &self.having {
            f(having)?;
        }
        for ordering in &self.orderings {
            f(&ordering.expr)?;
        }
        if let Some(limit) = &self.limit {
            f(limit)?;
        }
        if let Some(offset) = &self.offset {
            f(offset)?;
        }
        for expr in &self.identifier {
            f(expr)?;
        }
        Ok(())
    }

    /// Walk this select and every select nested inside of it, pre-order.
    ///
    /// Nested selects are derived tables and subqueries inside expressions.
    pub fn walk_selects_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut SelectExpr) -> Result<()>,
    {
        f(self)?;
        for table in &mut self.tables {
            if let TableSource::Derived(inner) = &mut table.source {
                inner.walk_selects_mut(f)?;
            }
        }
        self.for_each_expr_mut(&mut |expr| {
            expr.for_each_subquery_mut(&mut |subquery| subquery.walk_selects_mut(f))
        })
    }

    pub fn walk_selects<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(&SelectExpr) -> Result<()>,
    {
        f(self)?;
        for table in &self.tables {
            if let TableSource::Derived(inner) = &table.source {
                inner.walk_selects(f)?;
            }
        }
        self.for_each_expr(&mut |expr| {
            expr.for_each_subquery(&mut |subquery| subquery.walk_selects(f))
        })
    }
}

/// Pick a projection alias for an expression.
pub fn default_alias(expr: &SqlExpr) -> String {
    match expr {
        SqlExpr::Column(col) => col.name.clone(),
        _ => "c".to_string(),
    }
}

fn unique_projection_alias(projections: &[ProjectionExpr], alias: &str) -> String {
    let taken = |candidate: &str| {
        projections
            .iter()
            .any(|p| p.alias.eq_ignore_ascii_case(candidate))
    };

    if !taken(alias) {
        return alias.to_string();
    }

    let mut counter = 0;
    loop {
        let candidate = format!("{alias}{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.projections.is_empty() {
            write!(f, "1")?;
        }
        for (idx, proj) in self.projections.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} AS {}", proj.expr, proj.alias)?;
        }

        for (idx, table) in self.tables.iter().enumerate() {
            match &table.join {
                JoinType::From => write!(f, " FROM ")?,
                JoinType::Cross => write!(f, " CROSS JOIN ")?,
                JoinType::Inner(_) => write!(f, " INNER JOIN ")?,
                JoinType::LeftOuter(_) => write!(f, " LEFT JOIN ")?,
            }
            match &table.source {
                TableSource::Base { name, .. } => write!(f, "{name}")?,
                TableSource::Derived(inner) => write!(f, "({inner})")?,
            }
            write!(f, " AS {}", self.table_ref(idx))?;
            if let Some(alias) = &table.alias {
                write!(f, " [{alias}]")?;
            }
            if let Some(cond) = table.join.condition() {
                write!(f, " ON {cond}")?;
            }
        }

        if let Some(pred) = &self.predicate {
            write!(f, " WHERE {pred}")?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            for (idx, expr) in self.group_by.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{expr}")?;
            }
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {having}")?;
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
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{column, lit};
    use crate::types::DataType;

    fn base(name: &str) -> TableSource {
        TableSource::Base {
            schema: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn add_projection_dedups() {
        let mut select = SelectExpr::new(ScopeId(0));
        let t = select.add_table("c", base("customers"), JoinType::From);

        let a = select.add_projection(column(t, "id", DataType::Int32), "id");
        let b = select.add_projection(column(t, "id", DataType::Int32), "id");
        let c = select.add_projection(column(t, "name", DataType::Utf8), "ID");

        assert_eq!(0, a);
        assert_eq!(0, b);
        assert_eq!(1, c);
        assert_eq!("ID0", select.projections[1].alias);
    }

    #[test]
    fn lift_through_left_join_is_nullable() {
        let mut inner = SelectExpr::new(ScopeId(1));
        let it = inner.add_table("o", base("orders"), JoinType::From);

        let mut outer = SelectExpr::new(ScopeId(0));
        outer.add_table("c", base("customers"), JoinType::From);
        outer.add_table(
            "s",
            TableSource::Derived(Box::new(inner)),
            JoinType::LeftOuter(lit(true)),
        );

        let lifted = outer
            .lift_expr(1, column(it, "id", DataType::Int32))
            .unwrap();
        let SqlExpr::Column(col) = lifted else {
            panic!("not a column");
        };

        assert_eq!(TableRef::new(ScopeId(0), 1), col.table);
        assert_eq!("id", col.name);
        assert!(col.nullable);
        assert_eq!(1, outer.tables[1].as_derived().unwrap().projections.len());
    }

    #[test]
    fn lift_constant_passthrough() {
        let mut outer = SelectExpr::new(ScopeId(0));
        outer.add_table(
            "s",
            TableSource::Derived(Box::new(SelectExpr::new(ScopeId(1)))),
            JoinType::From,
        );

        let lifted = outer.lift_expr(0, lit(4)).unwrap();
        assert_eq!(lit(4), lifted);
        assert!(outer.tables[0].as_derived().unwrap().projections.is_empty());
    }

    #[test]
    fn lift_into_distinct_errors() {
        let mut inner = SelectExpr::new(ScopeId(1));
        let it = inner.add_table("o", base("orders"), JoinType::From);
        inner.distinct = true;

        let mut outer = SelectExpr::new(ScopeId(0));
        outer.add_table("s", TableSource::Derived(Box::new(inner)), JoinType::From);

        outer
            .lift_expr(0, column(it, "id", DataType::Int32))
            .unwrap_err();
    }

    #[test]
    fn requires_pushdown() {
        let mut select = SelectExpr::new(ScopeId(0));
        assert!(!select.requires_pushdown());
        select.limit = Some(lit(5));
        assert!(select.requires_pushdown());
    }
}
