//! Rewrite passes run over a translated query.
//!
//! Passes run in a fixed order:
//!
//! 1. Null comparison simplification.
//! 2. CASE flattening.
//! 3. Table alias uniquification.
//! 4. Collection join planning (single or split query).
//! 5. Projection binding, then dead projection pruning.
//!
//! The tree is verified after the last pass. The parameter based processor
//! runs later, once parameter values are known.

pub mod alias_uniquify;
pub mod binding;
pub mod case_flatten;
pub mod collection_join;
pub mod null_compare;
pub mod parameters;
pub mod prune;

use std::time::Instant;

use alias_uniquify::AliasUniquifyRewrite;
use case_flatten::CaseFlattenRewrite;
use collection_join::CollectionJoinRewrite;
use null_compare::NullCompareRewrite;
use relshape_error::Result;
use tracing::{debug, trace};

use crate::expr::integrity::verify_tree;
use crate::expr::select_expr::SelectExpr;
use crate::expr::{SqlExpr, lit};
use crate::shaper::{ResultShaper, ShapedQuery, ShaperExpr};
use crate::translate::context::CompilationContext;

pub trait ExpressionRewriteRule {
    /// Rewrite a single expression.
    ///
    /// If the rewrite doesn't apply, then the expression should be returned
    /// unmodified.
    fn rewrite(expression: SqlExpr) -> Result<SqlExpr>;
}

/// Output of the rewrite pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Statements to execute. The root statement is first, split collection
    /// statements follow in pre-order.
    pub statements: Vec<SelectExpr>,
    pub shaper: ResultShaper,
}

/// Run all passes over a translated query.
pub fn compile_query(ctx: &mut CompilationContext, mut query: ShapedQuery) -> Result<CompiledQuery> {
    let start = Instant::now();

    apply_expression_rule::<NullCompareRewrite>(&mut query)?;
    trace!(%query.select, "after null compare");

    apply_expression_rule::<CaseFlattenRewrite>(&mut query)?;
    trace!(%query.select, "after case flatten");

    AliasUniquifyRewrite::rewrite(ctx, &mut query)?;
    trace!(%query.select, "after alias uniquify");

    let query = CollectionJoinRewrite::rewrite(ctx, query)?;
    trace!(%query.select, "after collection join");

    let (mut statements, mut shaper) = binding::bind_projections(query)?;
    prune::prune_projections(&mut statements, &mut shaper)?;

    for statement in &statements {
        verify_tree(statement)?;
    }

    debug!(
        statements = statements.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "compiled query"
    );

    Ok(CompiledQuery { statements, shaper })
}

/// Apply an expression rule to every expression in the query, including
/// nested collection queries and the shaper's expressions.
pub fn apply_expression_rule<R: ExpressionRewriteRule>(query: &mut ShapedQuery) -> Result<()> {
    visit_query_exprs(query, &mut |expr| {
        // Replace with temp dummy value.
        let orig = std::mem::replace(expr, lit(0));
        *expr = R::rewrite(orig)?;
        Ok(())
    })
}

/// Apply an expression rule to every expression in a select tree.
pub fn apply_expression_rule_to_select<R: ExpressionRewriteRule>(select: &mut SelectExpr) -> Result<()> {
    select.walk_selects_mut(&mut |select| {
        select.for_each_expr_mut(&mut |expr| {
            let orig = std::mem::replace(expr, lit(0));
            *expr = R::rewrite(orig)?;
            Ok(())
        })
    })
}

fn visit_query_exprs<F>(query: &mut ShapedQuery, f: &mut F) -> Result<()>
where
    F: FnMut(&mut SqlExpr) -> Result<()>,
{
    query
        .select
        .walk_selects_mut(&mut |select| select.for_each_expr_mut(f))?;
    visit_shaper_exprs(&mut query.shaper, f)
}

/// Visit the shaper's own expressions, then anything nested in them.
fn visit_shaper_exprs<F>(shaper: &mut ShaperExpr, f: &mut F) -> Result<()>
where
    F: FnMut(&mut SqlExpr) -> Result<()>,
{
    shaper.for_each_sql_expr_mut(&mut |expr| {
        f(expr)?;
        expr.for_each_subquery_mut(&mut |subquery| {
            subquery.walk_selects_mut(&mut |select| select.for_each_expr_mut(f))
        })
    })?;
    visit_nested_exprs(shaper, f)
}

fn visit_nested_exprs<F>(shaper: &mut ShaperExpr, f: &mut F) -> Result<()>
where
    F: FnMut(&mut SqlExpr) -> Result<()>,
{
    match shaper {
        ShaperExpr::Object { fields } => {
            for (_, field) in fields {
                visit_nested_exprs(field, f)?;
            }
            Ok(())
        }
        ShaperExpr::CollectionNavigation(nav) => {
            for expr in &mut nav.child_keys {
                f(expr)?;
            }
            visit_query_exprs(&mut nav.query, f)
        }
        ShaperExpr::Collection(collection) => visit_nested_exprs(&mut collection.element, f),
        ShaperExpr::SplitCollection(split) => {
            split
                .statement
                .walk_selects_mut(&mut |select| select.for_each_expr_mut(f))?;
            visit_shaper_exprs(&mut split.element, f)
        }
        ShaperExpr::Projection(_) | ShaperExpr::Entity(_) => Ok(()),
    }
}
