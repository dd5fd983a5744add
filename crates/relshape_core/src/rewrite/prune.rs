use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashSet;
use relshape_error::{DbError, Result};
use tracing::trace;

use crate::expr::lit;
use crate::expr::select_expr::{ProjectionExpr, SelectExpr};
use crate::shaper::{ResultShaper, Shaper};

/// Alias of the placeholder projection left in derived tables that had all
/// their projections pruned.
pub const EMPTY_PROJECTION_ALIAS: &str = "empty";

/// Remove projections nothing reads.
///
/// Statement projections are kept only if the shaper reads them, with the
/// shaper's positions remapped. Derived table projections are kept only if
/// referenced from the enclosing select, pruned top-down so projections only
/// referenced by pruned projections go away too. Projections of DISTINCT
/// selects are never pruned.
pub fn prune_projections(statements: &mut [SelectExpr], shaper: &mut ResultShaper) -> Result<()> {
    let mut used = vec![BTreeSet::new(); statements.len()];
    collect_positions(&shaper.root, 0, &mut used)?;
    if let Some(grouping) = &shaper.grouping {
        used[0].extend(grouping.iter().copied());
    }

    let mut maps = Vec::with_capacity(statements.len());
    for (statement, used) in statements.iter_mut().zip(&used) {
        maps.push(retain_projections(statement, used));
    }

    remap_positions(&mut shaper.root, 0, &maps)?;
    if let Some(grouping) = &mut shaper.grouping {
        for pos in grouping {
            *pos = lookup(&maps, 0, *pos)?;
        }
    }

    for statement in statements.iter_mut() {
        // Identifiers were only needed for planning.
        statement.walk_selects_mut(&mut |select| {
            select.identifier.clear();
            Ok(())
        })?;
        prune_derived(statement)?;
    }

    Ok(())
}

fn collect_positions(shaper: &Shaper, statement: usize, used: &mut [BTreeSet<usize>]) -> Result<()> {
    let set = used
        .get_mut(statement)
        .ok_or_else(|| DbError::internal("Shaper references a missing statement").with_field("statement", statement))?;

    match shaper {
        Shaper::Scalar(pos) => {
            set.insert(*pos);
        }
        Shaper::Object { fields, null_check } => {
            set.extend(null_check.iter().copied());
            for (_, field) in fields {
                collect_positions(field, statement, used)?;
            }
        }
        Shaper::Collection(collection) => {
            set.extend(
                collection
                    .parent_identifier
                    .iter()
                    .chain(&collection.outer_identifier)
                    .chain(&collection.self_identifier)
                    .copied(),
            );
            collect_positions(&collection.element, statement, used)?;
        }
        Shaper::SplitCollection(split) => {
            set.extend(split.parent_identifier.iter().copied());
            let child = used
                .get_mut(split.statement)
                .ok_or_else(|| DbError::internal("Split collection references a missing statement"))?;
            child.extend(
                split
                    .child_identifier
                    .iter()
                    .chain(&split.self_identifier)
                    .copied(),
            );
            collect_positions(&split.element, split.statement, used)?;
        }
    }

    Ok(())
}

/// Keep only the used projections, returning the old to new position map.
fn retain_projections(select: &mut SelectExpr, used: &BTreeSet<usize>) -> Vec<Option<usize>> {
    let mut map = vec![None; select.projections.len()];
    let projections = std::mem::take(&mut select.projections);
    for (idx, projection) in projections.into_iter().enumerate() {
        if used.contains(&idx) {
            map[idx] = Some(select.projections.len());
            select.projections.push(projection);
        } else {
            trace!(alias = %projection.alias, "pruned statement projection");
        }
    }
    map
}

fn lookup(maps: &[Vec<Option<usize>>], statement: usize, pos: usize) -> Result<usize> {
    maps.get(statement)
        .and_then(|map| map.get(pos).copied().flatten())
        .ok_or_else(|| {
            DbError::internal("Shaper position was pruned")
                .with_field("statement", statement)
                .with_field("position", pos)
        })
}

fn remap_positions(shaper: &mut Shaper, statement: usize, maps: &[Vec<Option<usize>>]) -> Result<()> {
    let remap = |positions: &mut [usize], statement: usize| -> Result<()> {
        for pos in positions {
            *pos = lookup(maps, statement, *pos)?;
        }
        Ok(())
    };

    match shaper {
        Shaper::Scalar(pos) => *pos = lookup(maps, statement, *pos)?,
        Shaper::Object { fields, null_check } => {
            remap(null_check, statement)?;
            for (_, field) in fields {
                remap_positions(field, statement, maps)?;
            }
        }
        Shaper::Collection(collection) => {
            remap(&mut collection.parent_identifier, statement)?;
            remap(&mut collection.outer_identifier, statement)?;
            remap(&mut collection.self_identifier, statement)?;
            remap_positions(&mut collection.element, statement, maps)?;
        }
        Shaper::SplitCollection(split) => {
            let split = Arc::make_mut(split);
            remap(&mut split.parent_identifier, statement)?;
            remap(&mut split.child_identifier, split.statement)?;
            remap(&mut split.self_identifier, split.statement)?;
            remap_positions(&mut split.element, split.statement, maps)?;
        }
    }

    Ok(())
}

/// Prune projections of derived tables to what the select references.
fn prune_derived(select: &mut SelectExpr) -> Result<()> {
    for idx in 0..select.tables.len() {
        if select.tables[idx].as_derived().is_none() {
            continue;
        }

        let table_ref = select.table_ref(idx);
        let mut referenced = HashSet::new();
        select.for_each_expr(&mut |expr| {
            expr.for_each_column(&mut |col| {
                if col.table == table_ref {
                    referenced.insert(col.name.clone());
                }
                Ok(())
            })
        })?;

        let Some(inner) = select.tables[idx].as_derived_mut() else {
            continue;
        };
        if inner.distinct {
            continue;
        }

        let before = inner.projections.len();
        inner
            .projections
            .retain(|proj| referenced.contains(&proj.alias));
        if inner.projections.is_empty() {
            inner.projections.push(ProjectionExpr {
                expr: lit(1),
                alias: EMPTY_PROJECTION_ALIAS.to_string(),
            });
        }
        trace!(table = %table_ref, before, after = inner.projections.len(), "pruned derived table");
    }

    for table in &mut select.tables {
        if let Some(inner) = table.as_derived_mut() {
            prune_derived(inner)?;
        }
    }

    select.for_each_expr_mut(&mut |expr| expr.for_each_subquery_mut(&mut prune_derived))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::ScopeId;
    use crate::expr::select_expr::{JoinType, TableSource};
    use crate::expr::{column, eq};
    use crate::types::DataType;

    fn base(name: &str) -> TableSource {
        TableSource::Base {
            schema: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn prune_unused_statement_projection() {
        let mut select = SelectExpr::new(ScopeId(0));
        let t = select.add_table("t", base("t"), JoinType::From);
        select.add_projection(column(t, "a", DataType::Int32), "a");
        select.add_projection(column(t, "b", DataType::Int32), "b");
        select.add_projection(column(t, "c", DataType::Int32), "c");

        let mut statements = vec![select];
        let mut shaper = ResultShaper {
            root: Shaper::Object {
                fields: vec![
                    ("c".to_string(), Shaper::Scalar(2)),
                    ("a".to_string(), Shaper::Scalar(0)),
                ],
                null_check: Vec::new(),
            },
            grouping: None,
        };

        prune_projections(&mut statements, &mut shaper).unwrap();

        let aliases: Vec<_> = statements[0].projections.iter().map(|p| p.alias.as_str()).collect();
        assert_eq!(vec!["a", "c"], aliases);
        let expected = Shaper::Object {
            fields: vec![
                ("c".to_string(), Shaper::Scalar(1)),
                ("a".to_string(), Shaper::Scalar(0)),
            ],
            null_check: Vec::new(),
        };
        assert_eq!(expected, shaper.root);
    }

    #[test]
    fn prune_derived_projections() {
        let mut inner = SelectExpr::new(ScopeId(1));
        let t = inner.add_table("t", base("t"), JoinType::From);
        inner.add_projection(column(t, "a", DataType::Int32), "a");
        inner.add_projection(column(t, "b", DataType::Int32), "b");

        let mut empty = SelectExpr::new(ScopeId(2));
        let u = empty.add_table("u", base("u"), JoinType::From);
        empty.add_projection(column(u, "x", DataType::Int32), "x");

        let mut outer = SelectExpr::new(ScopeId(0));
        let s = outer.add_table("s", TableSource::Derived(Box::new(inner)), JoinType::From);
        outer.add_table("s0", TableSource::Derived(Box::new(empty)), JoinType::Cross);
        outer.add_predicate(eq(column(s, "b", DataType::Int32), column(s, "b", DataType::Int32)));

        prune_derived(&mut outer).unwrap();

        let inner = outer.tables[0].as_derived().unwrap();
        assert_eq!(1, inner.projections.len());
        assert_eq!("b", inner.projections[0].alias);

        let empty = outer.tables[1].as_derived().unwrap();
        assert_eq!(EMPTY_PROJECTION_ALIAS, empty.projections[0].alias);
    }

    #[test]
    fn distinct_never_pruned() {
        let mut inner = SelectExpr::new(ScopeId(1));
        let t = inner.add_table("t", base("t"), JoinType::From);
        inner.add_projection(column(t, "a", DataType::Int32), "a");
        inner.add_projection(column(t, "b", DataType::Int32), "b");
        inner.distinct = true;

        let mut outer = SelectExpr::new(ScopeId(0));
        outer.add_table("s", TableSource::Derived(Box::new(inner)), JoinType::From);

        prune_derived(&mut outer).unwrap();
        assert_eq!(2, outer.tables[0].as_derived().unwrap().projections.len());
    }
}
