use relshape_error::Result;

use crate::expr::select_expr::SelectExpr;
use crate::shaper::{ShapedQuery, ShaperExpr};
use crate::translate::context::CompilationContext;

/// Give every table in the query an alias unique across the statement.
///
/// Tables are visited pre-order. Nested collection queries are visited after
/// the select they belong to, since they may end up joined into it.
#[derive(Debug)]
pub struct AliasUniquifyRewrite;

impl AliasUniquifyRewrite {
    pub fn rewrite(ctx: &mut CompilationContext, query: &mut ShapedQuery) -> Result<()> {
        Self::rewrite_select(ctx, &mut query.select)?;
        Self::rewrite_shaper(ctx, &mut query.shaper)
    }

    fn rewrite_select(ctx: &mut CompilationContext, select: &mut SelectExpr) -> Result<()> {
        select.walk_selects_mut(&mut |select| {
            for idx in 0..select.tables.len() {
                let table_ref = select.table_ref(idx);
                let table = &mut select.tables[idx];
                let Some(alias) = &table.alias else {
                    continue;
                };
                if let Some(unique) = ctx.aliases.uniquify(table_ref, alias) {
                    table.alias = Some(unique);
                }
            }
            Ok(())
        })
    }

    fn rewrite_shaper(ctx: &mut CompilationContext, shaper: &mut ShaperExpr) -> Result<()> {
        match shaper {
            ShaperExpr::Object { fields } => {
                for (_, field) in fields {
                    Self::rewrite_shaper(ctx, field)?;
                }
                Ok(())
            }
            ShaperExpr::CollectionNavigation(nav) => Self::rewrite(ctx, &mut nav.query),
            ShaperExpr::Collection(collection) => Self::rewrite_shaper(ctx, &mut collection.element),
            ShaperExpr::SplitCollection(split) => {
                Self::rewrite_select(ctx, &mut split.statement)?;
                Self::rewrite_shaper(ctx, &mut split.element)
            }
            ShaperExpr::Projection(_) | ShaperExpr::Entity(_) => Ok(()),
        }
    }
}
