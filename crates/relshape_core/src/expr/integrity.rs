use relshape_error::{DbError, DbErrorKind, Result};

use super::SqlExpr;
use super::column_expr::{ColumnExpr, ScopeId};
use super::select_expr::{SelectExpr, TableSource};

/// Verify that every column in the tree resolves to a table reachable from
/// where the column is used.
///
/// A column may reference a table in its own select, or a table in any
/// select enclosing it through a subquery expression. Derived tables are not
/// lateral, they can't see the select they're a part of.
///
/// Columns referencing derived tables must name one of the derived table's
/// projections.
pub fn verify_tree(select: &SelectExpr) -> Result<()> {
    let mut stack = Vec::new();
    verify_select(select, &mut stack)
}

/// Tables visible in a single scope.
#[derive(Debug)]
struct ScopeTables {
    scope: ScopeId,
    /// Per table, the projected names if the table is derived.
    tables: Vec<Option<Vec<String>>>,
}

impl ScopeTables {
    fn new(select: &SelectExpr) -> Self {
        let tables = select
            .tables
            .iter()
            .map(|table| match &table.source {
                TableSource::Derived(inner) => {
                    Some(inner.projections.iter().map(|p| p.alias.clone()).collect())
                }
                TableSource::Base { .. } => None,
            })
            .collect();

        ScopeTables {
            scope: select.scope,
            tables,
        }
    }
}

fn verify_select(select: &SelectExpr, stack: &mut Vec<ScopeTables>) -> Result<()> {
    if stack.iter().any(|s| s.scope == select.scope) {
        return Err(
            integrity_error("Duplicate scope in select tree").with_field("scope", select.scope)
        );
    }

    for table in &select.tables {
        if let TableSource::Derived(inner) = &table.source {
            verify_select(inner, stack)?;
        }
    }

    stack.push(ScopeTables::new(select));
    let result = select.for_each_expr(&mut |expr| verify_expr(expr, stack));
    stack.pop();

    result
}

fn verify_expr(expr: &SqlExpr, stack: &mut Vec<ScopeTables>) -> Result<()> {
    match expr {
        SqlExpr::Column(col) => verify_column(col, stack),
        SqlExpr::Exists(exists) => verify_select(&exists.subquery, stack),
        SqlExpr::Subquery(subquery) => verify_select(&subquery.subquery, stack),
        other => other.for_each_child(&mut |child| verify_expr(child, stack)),
    }
}

fn verify_column(col: &ColumnExpr, stack: &[ScopeTables]) -> Result<()> {
    let owner = stack
        .iter()
        .rev()
        .find(|s| s.scope == col.table.scope)
        .ok_or_else(|| dangling(col, "table scope not reachable"))?;

    let table = owner
        .tables
        .get(col.table.table_idx)
        .ok_or_else(|| dangling(col, "table index out of range"))?;

    if let Some(names) = table {
        if !names.iter().any(|name| name == &col.name) {
            return Err(dangling(col, "column not projected by derived table"));
        }
    }

    Ok(())
}

fn integrity_error(msg: &str) -> DbError {
    DbError::with_kind(DbErrorKind::TreeIntegrity, msg)
}

fn dangling(col: &ColumnExpr, reason: &'static str) -> DbError {
    integrity_error("Dangling column reference")
        .with_field("column", col.to_string())
        .with_field("reason", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::TableRef;
    use crate::expr::select_expr::JoinType;
    use crate::expr::subquery_expr::ExistsExpr;
    use crate::expr::{column, eq};
    use crate::types::DataType;

    fn base(name: &str) -> TableSource {
        TableSource::Base {
            schema: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn valid_correlated_subquery() {
        let mut outer = SelectExpr::new(ScopeId(0));
        let c = outer.add_table("c", base("customers"), JoinType::From);

        let mut sub = SelectExpr::new(ScopeId(1));
        let o = sub.add_table("o", base("orders"), JoinType::From);
        sub.predicate = Some(eq(
            column(o, "customer_id", DataType::Int32),
            column(c, "id", DataType::Int32),
        ));
        outer.predicate = Some(SqlExpr::Exists(ExistsExpr {
            subquery: Box::new(sub),
            negated: false,
        }));

        verify_tree(&outer).unwrap();
    }

    #[test]
    fn dangling_scope() {
        let mut select = SelectExpr::new(ScopeId(0));
        select.add_table("c", base("customers"), JoinType::From);
        select.add_projection(column(TableRef::new(ScopeId(7), 0), "id", DataType::Int32), "id");

        let err = verify_tree(&select).unwrap_err();
        assert_eq!(DbErrorKind::TreeIntegrity, err.kind());
    }

    #[test]
    fn derived_table_missing_projection() {
        let mut inner = SelectExpr::new(ScopeId(1));
        inner.add_table("o", base("orders"), JoinType::From);

        let mut outer = SelectExpr::new(ScopeId(0));
        let s = outer.add_table("s", TableSource::Derived(Box::new(inner)), JoinType::From);
        outer.add_projection(column(s, "id", DataType::Int32), "id");

        let err = verify_tree(&outer).unwrap_err();
        assert_eq!(DbErrorKind::TreeIntegrity, err.kind());
    }

    #[test]
    fn derived_table_is_not_lateral() {
        let mut outer = SelectExpr::new(ScopeId(0));
        let c = outer.add_table("c", base("customers"), JoinType::From);

        let mut inner = SelectExpr::new(ScopeId(1));
        inner.add_table("o", base("orders"), JoinType::From);
        inner.add_projection(column(c, "id", DataType::Int32), "id");
        outer.add_table(
            "s",
            TableSource::Derived(Box::new(inner)),
            JoinType::Cross,
        );

        verify_tree(&outer).unwrap_err();
    }
}
