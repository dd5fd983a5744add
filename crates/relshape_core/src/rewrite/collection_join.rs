use relshape_error::{DbError, DbErrorKind, Result};
use tracing::{debug, warn};

use crate::config::session::QuerySplittingBehavior;
use crate::expr::select_expr::{JoinType, OrderingExpr, SelectExpr, TableSource, default_alias};
use crate::expr::window_expr::RowNumberExpr;
use crate::expr::{SqlExpr, add, and_all, eq, gt, lit, lt_eq};
use crate::scalar::ScalarValue;
use crate::shaper::{
    CollectionNavigationExpr, CollectionShaperExpr, ShapedQuery, ShaperExpr,
    SplitCollectionShaperExpr,
};
use crate::translate::context::{CompilationContext, Diagnostic};

/// Plans collection navigations in the shaper.
///
/// In single query mode, collections are left joined into the parent select
/// and the parent is ordered such that rows for the same parent are
/// adjacent. In split query mode, each collection gets its own statement
/// joining the parent query to the collection query.
#[derive(Debug)]
pub struct CollectionJoinRewrite;

impl CollectionJoinRewrite {
    pub fn rewrite(ctx: &mut CompilationContext, mut query: ShapedQuery) -> Result<ShapedQuery> {
        if !query.shaper.contains_collections() {
            return Ok(query);
        }

        let navigations = query.shaper.count_navigations();
        if navigations >= 2
            && ctx.splitting == QuerySplittingBehavior::Unspecified
            && ctx.warn_multiple_collections
            && ctx.report_once(Diagnostic::MultipleCollectionsWithoutSplitting)
        {
            warn!(
                navigations,
                "Loading multiple collections in a single query without configuring a splitting behavior, this may cause slow query performance"
            );
        }

        let split = ctx.splitting.is_split();
        debug!(split, navigations, "planning collections");

        if split {
            plan_split(ctx, &mut query.select, &mut query.shaper)?;
        } else {
            if query.select.requires_pushdown() {
                let alias = ctx.aliases.generate("s");
                query.push_down(ctx.next_scope(), alias)?;
            }
            plan_single(ctx, &mut query.select, &mut query.shaper)?;
        }

        Ok(query)
    }
}

/// Replace navigations in the shaper with collections joined into `parent`.
fn plan_single(ctx: &mut CompilationContext, parent: &mut SelectExpr, shaper: &mut ShaperExpr) -> Result<()> {
    match shaper {
        ShaperExpr::Object { fields } => {
            for (_, field) in fields {
                plan_single(ctx, parent, field)?;
            }
            Ok(())
        }
        ShaperExpr::CollectionNavigation(nav) => {
            let nav = std::mem::replace(nav.as_mut(), empty_navigation(parent));
            *shaper = join_collection(ctx, parent, nav)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn join_collection(
    ctx: &mut CompilationContext,
    parent: &mut SelectExpr,
    nav: CollectionNavigationExpr,
) -> Result<ShaperExpr> {
    let collection_id = ctx.next_collection_id();
    if parent.identifier.is_empty() {
        return Err(DbError::with_kind(
            DbErrorKind::UnsupportedOperation,
            "Collection cannot be loaded because its parent rows cannot be uniquely identified",
        )
        .with_field("navigation", nav.navigation));
    }

    let CollectionNavigationExpr {
        navigation,
        query: mut child,
        parent_keys,
        mut child_keys,
    } = nav;

    let row_range = prepare_child(ctx, &mut child, &mut child_keys)?;

    // Nested collections join into the child before the child joins into us.
    plan_single(ctx, &mut child.select, &mut child.shaper)?;

    let child_orderings = std::mem::take(&mut child.select.orderings);
    let child_identifier = std::mem::take(&mut child.select.identifier);
    if child_identifier.is_empty() {
        return Err(DbError::with_kind(
            DbErrorKind::UnsupportedOperation,
            "Collection cannot be loaded because its rows cannot be uniquely identified",
        )
        .with_field("navigation", navigation));
    }

    let table_idx = parent.tables.len();
    let alias = ctx.aliases.generate("s");
    parent.add_table(
        alias,
        TableSource::Derived(Box::new(child.select)),
        JoinType::LeftOuter(lit(true)),
    );

    let child_keys = parent.lift_exprs(table_idx, child_keys)?;
    let mut conditions: Vec<_> = parent_keys
        .into_iter()
        .zip(child_keys)
        .map(|(p, c)| eq(p, c))
        .collect();
    if let Some(range) = row_range {
        let row_number = parent.lift_expr(table_idx, range.row_number.clone())?;
        conditions.extend(range.predicates(row_number));
    }
    let condition = and_all(conditions).ok_or_else(|| {
        DbError::new("Collection navigation has no correlation keys").with_field("navigation", navigation.clone())
    })?;
    parent.tables[table_idx].join = JoinType::LeftOuter(condition);

    let mut element = child.shaper;
    element.for_each_sql_expr_mut(&mut |expr| {
        let orig = std::mem::replace(expr, lit(0));
        *expr = parent.lift_expr(table_idx, orig)?;
        Ok(())
    })?;
    // Nested collections get our identifier prepended to their outer
    // identifier, after lifting since ours is already in the parent's scope.
    prepend_outer_identifier(&mut element, &parent.identifier);

    let self_identifier = parent.lift_exprs(table_idx, child_identifier)?;

    let identifier = parent.identifier.clone();
    push_orderings(&mut parent.orderings, identifier.iter().cloned().map(ascending));
    for ordering in child_orderings {
        let expr = parent.lift_expr(table_idx, ordering.expr)?;
        push_orderings(
            &mut parent.orderings,
            [OrderingExpr {
                expr,
                ascending: ordering.ascending,
            }],
        );
    }
    push_orderings(&mut parent.orderings, self_identifier.iter().cloned().map(ascending));

    debug!(collection_id, %navigation, "joined collection");

    Ok(ShaperExpr::Collection(Box::new(CollectionShaperExpr {
        collection_id,
        parent_identifier: identifier,
        outer_identifier: Vec::new(),
        self_identifier,
        element,
    })))
}

/// Replace navigations in the shaper with collections read from their own
/// statements.
fn plan_split(ctx: &mut CompilationContext, parent: &mut SelectExpr, shaper: &mut ShaperExpr) -> Result<()> {
    match shaper {
        ShaperExpr::Object { fields } => {
            for (_, field) in fields {
                plan_split(ctx, parent, field)?;
            }
            Ok(())
        }
        ShaperExpr::CollectionNavigation(nav) => {
            let nav = std::mem::replace(nav.as_mut(), empty_navigation(parent));
            *shaper = split_collection(ctx, parent, nav)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn split_collection(
    ctx: &mut CompilationContext,
    parent: &mut SelectExpr,
    nav: CollectionNavigationExpr,
) -> Result<ShaperExpr> {
    let collection_id = ctx.next_collection_id();
    if parent.identifier.is_empty() {
        return Err(DbError::with_kind(
            DbErrorKind::SplitQueryInfeasible,
            "Collection cannot be loaded with split queries since the parent rows cannot be uniquely identified, use single query mode or include a key of the parent in the query",
        )
        .with_field("navigation", nav.navigation));
    }

    let CollectionNavigationExpr {
        navigation,
        query: mut child,
        parent_keys,
        mut child_keys,
    } = nav;

    // Parent rows must come back in the same order as rows of the collection
    // statement.
    let ordered_by_identifier = parent
        .orderings
        .iter()
        .all(|o| o.ascending && parent.identifier.contains(&o.expr));
    let identifier = parent.identifier.clone();
    push_orderings(&mut parent.orderings, identifier.iter().cloned().map(ascending));

    let row_range = prepare_child(ctx, &mut child, &mut child_keys)?;

    let child_orderings = std::mem::take(&mut child.select.orderings);
    let child_self_identifier = std::mem::take(&mut child.select.identifier);
    if child_self_identifier.is_empty() {
        return Err(DbError::with_kind(
            DbErrorKind::SplitQueryInfeasible,
            "Collection cannot be loaded with split queries since its rows cannot be uniquely identified",
        )
        .with_field("navigation", navigation));
    }

    let mut statement = SelectExpr::new(ctx.next_scope());

    let mut parent_copy = parent.clone();
    parent_copy.projections.clear();
    let parent_orderings = if parent_copy.limit.is_some() || parent_copy.offset.is_some() {
        parent_copy.orderings.clone()
    } else {
        std::mem::take(&mut parent_copy.orderings)
    };
    parent_copy.identifier.clear();

    statement.add_table(
        ctx.aliases.generate("s"),
        TableSource::Derived(Box::new(parent_copy)),
        JoinType::From,
    );
    statement.add_table(
        ctx.aliases.generate("s"),
        TableSource::Derived(Box::new(child.select)),
        JoinType::Inner(lit(true)),
    );

    let parent_keys = statement.lift_exprs(0, parent_keys)?;
    let child_keys = statement.lift_exprs(1, child_keys)?;
    let mut conditions: Vec<_> = parent_keys
        .into_iter()
        .zip(child_keys)
        .map(|(p, c)| eq(p, c))
        .collect();
    if let Some(range) = row_range {
        let row_number = statement.lift_expr(1, range.row_number.clone())?;
        conditions.extend(range.predicates(row_number));
    }
    let condition = and_all(conditions).ok_or_else(|| {
        DbError::new("Collection navigation has no correlation keys").with_field("navigation", navigation.clone())
    })?;
    statement.tables[1].join = JoinType::Inner(condition);

    let child_identifier = statement.lift_exprs(0, identifier.clone())?;
    let self_identifier = statement.lift_exprs(1, child_self_identifier)?;

    for ordering in parent_orderings {
        let expr = statement.lift_expr(0, ordering.expr)?;
        push_orderings(
            &mut statement.orderings,
            [OrderingExpr {
                expr,
                ascending: ordering.ascending,
            }],
        );
    }
    push_orderings(&mut statement.orderings, child_identifier.iter().cloned().map(ascending));
    for ordering in child_orderings {
        let expr = statement.lift_expr(1, ordering.expr)?;
        push_orderings(
            &mut statement.orderings,
            [OrderingExpr {
                expr,
                ascending: ordering.ascending,
            }],
        );
    }
    push_orderings(&mut statement.orderings, self_identifier.iter().cloned().map(ascending));

    statement.identifier = child_identifier.iter().chain(&self_identifier).cloned().collect();

    let mut element = child.shaper;
    element.for_each_sql_expr_mut(&mut |expr| {
        let orig = std::mem::replace(expr, lit(0));
        *expr = statement.lift_expr(1, orig)?;
        Ok(())
    })?;

    // Collections nested in the element use this statement as their parent.
    plan_split(ctx, &mut statement, &mut element)?;

    debug!(collection_id, %navigation, "split collection");

    Ok(ShaperExpr::SplitCollection(Box::new(SplitCollectionShaperExpr {
        collection_id,
        parent_identifier: identifier,
        child_identifier,
        self_identifier,
        element,
        statement,
        ordered_by_identifier,
    })))
}

/// Row number range limiting rows per parent.
#[derive(Debug)]
struct RowRange {
    row_number: SqlExpr,
    offset: Option<SqlExpr>,
    limit: Option<SqlExpr>,
}

impl RowRange {
    /// Predicates on the (lifted) row number.
    fn predicates(self, row_number: SqlExpr) -> Vec<SqlExpr> {
        let mut preds = Vec::new();
        if let Some(offset) = &self.offset {
            preds.push(gt(row_number.clone(), offset.clone()));
        }
        if let Some(limit) = self.limit {
            let upper = match self.offset {
                Some(offset) => add_counts(offset, limit),
                None => limit,
            };
            preds.push(lt_eq(row_number, upper));
        }
        preds
    }
}

fn add_counts(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    if let (SqlExpr::Constant(l), SqlExpr::Constant(r)) = (&left, &right) {
        if let (Ok(l), Ok(r)) = (l.value.try_as_i64(), r.value.try_as_i64()) {
            return lit(ScalarValue::Int64(l + r));
        }
    }
    add(left, right)
}

/// Prepare a collection query for being joined to its parent.
///
/// A limit or offset is replaced with a row number partitioned by the
/// correlation keys, since it applies per parent. DISTINCT and GROUP BY get
/// pushed down, with the correlation keys made part of them.
fn prepare_child(
    ctx: &mut CompilationContext,
    child: &mut ShapedQuery,
    child_keys: &mut Vec<SqlExpr>,
) -> Result<Option<RowRange>> {
    let limit = child.select.limit.take();
    let offset = child.select.offset.take();

    if child.select.distinct || !child.select.group_by.is_empty() {
        if child.select.distinct {
            for key in child_keys.iter() {
                child.select.add_projection(key.clone(), &default_alias(key));
            }
        } else {
            for key in child_keys.iter() {
                if !child.select.group_by.contains(key) {
                    child.select.group_by.push(key.clone());
                }
            }
        }
        let alias = ctx.aliases.generate("s");
        child.push_down(ctx.next_scope(), alias)?;
        *child_keys = child.select.lift_exprs(0, std::mem::take(child_keys))?;
    }

    if limit.is_none() && offset.is_none() {
        return Ok(None);
    }

    let orderings = if child.select.orderings.is_empty() {
        child.select.identifier.iter().cloned().map(ascending).collect()
    } else {
        child.select.orderings.clone()
    };

    let row_number = SqlExpr::RowNumber(RowNumberExpr {
        partitions: child_keys.clone(),
        orderings,
    });
    child.select.add_projection(row_number.clone(), "row");

    Ok(Some(RowRange {
        row_number,
        offset,
        limit,
    }))
}

fn ascending(expr: SqlExpr) -> OrderingExpr {
    OrderingExpr {
        expr,
        ascending: true,
    }
}

/// Append orderings, skipping expressions already ordered on.
fn push_orderings(orderings: &mut Vec<OrderingExpr>, new: impl IntoIterator<Item = OrderingExpr>) {
    for ordering in new {
        if !orderings.iter().any(|o| o.expr == ordering.expr) {
            orderings.push(ordering);
        }
    }
}

fn prepend_outer_identifier(shaper: &mut ShaperExpr, identifier: &[SqlExpr]) {
    match shaper {
        ShaperExpr::Object { fields } => {
            for (_, field) in fields {
                prepend_outer_identifier(field, identifier);
            }
        }
        ShaperExpr::Collection(collection) => {
            let mut outer = identifier.to_vec();
            outer.append(&mut collection.outer_identifier);
            collection.outer_identifier = outer;
            prepend_outer_identifier(&mut collection.element, identifier);
        }
        _ => (),
    }
}

/// Placeholder swapped in while a navigation is being planned.
fn empty_navigation(parent: &SelectExpr) -> CollectionNavigationExpr {
    CollectionNavigationExpr {
        navigation: String::new(),
        query: ShapedQuery {
            select: SelectExpr::new(parent.scope),
            shaper: ShaperExpr::Projection(lit(0)),
        },
        parent_keys: Vec::new(),
        child_keys: Vec::new(),
    }
}
