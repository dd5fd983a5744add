use relshape_error::{DbError, Result};

use crate::expr::SqlExpr;
use crate::expr::select_expr::{SelectExpr, default_alias};
use crate::shaper::{
    CollectionShaper, ResultShaper, ShapedQuery, Shaper, ShaperExpr, SplitCollectionShaper,
};

/// Bind shaper expressions to projections of the statements they read from.
///
/// Returns the statements in execution order: the root statement first, then
/// split collection statements in pre-order.
pub fn bind_projections(query: ShapedQuery) -> Result<(Vec<SelectExpr>, ResultShaper)> {
    let ShapedQuery { mut select, shaper } = query;

    // Slot 0 is filled with the root once binding is done.
    let mut statements = vec![SelectExpr::new(select.scope)];
    let root = bind_shaper(&mut select, shaper, &mut statements)?;

    let grouping = if contains_joined_collection(&root) {
        let identifier = select.identifier.clone();
        Some(project_all(&mut select, identifier))
    } else {
        None
    };

    statements[0] = select;

    Ok((statements, ResultShaper { root, grouping }))
}

fn bind_shaper(select: &mut SelectExpr, shaper: ShaperExpr, statements: &mut Vec<SelectExpr>) -> Result<Shaper> {
    match shaper {
        ShaperExpr::Projection(expr) => Ok(Shaper::Scalar(project(select, expr))),
        ShaperExpr::Entity(entity) => {
            let null_check = if entity.nullable {
                project_all(select, entity.key_exprs())
            } else {
                Vec::new()
            };
            let fields = entity
                .entity
                .properties
                .iter()
                .zip(entity.properties)
                .map(|(prop, expr)| (prop.name.clone(), Shaper::Scalar(project(select, expr))))
                .collect();
            Ok(Shaper::Object { fields, null_check })
        }
        ShaperExpr::Object { fields } => {
            let fields = fields
                .into_iter()
                .map(|(name, field)| Ok((name, bind_shaper(select, field, statements)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Shaper::Object {
                fields,
                null_check: Vec::new(),
            })
        }
        ShaperExpr::CollectionNavigation(nav) => Err(DbError::internal(
            "Collection navigation was not planned before binding",
        )
        .with_field("navigation", nav.navigation)),
        ShaperExpr::Collection(collection) => {
            let parent_identifier = project_all(select, collection.parent_identifier);
            let outer_identifier = project_all(select, collection.outer_identifier);
            let self_identifier = project_all(select, collection.self_identifier);
            let element = bind_shaper(select, collection.element, statements)?;
            Ok(Shaper::Collection(Box::new(CollectionShaper {
                collection_id: collection.collection_id,
                parent_identifier,
                outer_identifier,
                self_identifier,
                element,
            })))
        }
        ShaperExpr::SplitCollection(split) => {
            let parent_identifier = project_all(select, split.parent_identifier);

            // Reserve the slot so statements are numbered pre-order.
            let statement_idx = statements.len();
            let mut statement = split.statement;
            statements.push(SelectExpr::new(statement.scope));

            let child_identifier = project_all(&mut statement, split.child_identifier);
            let self_identifier = project_all(&mut statement, split.self_identifier);
            let element = bind_shaper(&mut statement, split.element, statements)?;
            statements[statement_idx] = statement;

            Ok(Shaper::SplitCollection(
                SplitCollectionShaper {
                    collection_id: split.collection_id,
                    statement: statement_idx,
                    parent_identifier,
                    child_identifier,
                    self_identifier,
                    element,
                    ordered_by_identifier: split.ordered_by_identifier,
                }
                .into(),
            ))
        }
    }
}

fn project(select: &mut SelectExpr, expr: SqlExpr) -> usize {
    let alias = default_alias(&expr);
    select.add_projection(expr, &alias)
}

fn project_all(select: &mut SelectExpr, exprs: Vec<SqlExpr>) -> Vec<usize> {
    exprs.into_iter().map(|expr| project(select, expr)).collect()
}

/// If the shaper contains a collection joined into the current statement.
fn contains_joined_collection(shaper: &Shaper) -> bool {
    match shaper {
        Shaper::Collection(_) => true,
        Shaper::Object { fields, .. } => fields.iter().any(|(_, f)| contains_joined_collection(f)),
        Shaper::Scalar(_) | Shaper::SplitCollection(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::session::QuerySplittingBehavior;
    use crate::query::{Queryable, new_object, var};
    use crate::rewrite::collection_join::CollectionJoinRewrite;
    use crate::testutil::TestModel;
    use crate::translate::TranslatorRegistry;
    use crate::translate::context::{CompilationContext, NopDiagnostics};
    use crate::translate::queryable::QueryableTranslator;

    fn bind(query: &Queryable, splitting: QuerySplittingBehavior) -> (Vec<SelectExpr>, ResultShaper) {
        let model = TestModel::new();
        let registry = TranslatorRegistry::with_builtins();
        let mut ctx = CompilationContext::new(splitting, Arc::new(NopDiagnostics));
        let shaped = QueryableTranslator::new(&model, &registry, &mut ctx)
            .translate(query)
            .unwrap();
        let planned = CollectionJoinRewrite::rewrite(&mut ctx, shaped).unwrap();
        bind_projections(planned).unwrap()
    }

    #[test]
    fn entity_binds_all_properties() {
        let (statements, shaper) = bind(&Queryable::source("Customer"), QuerySplittingBehavior::Unspecified);
        assert_eq!(1, statements.len());
        assert!(shaper.grouping.is_none());

        let Shaper::Object { fields, null_check } = &shaper.root else {
            panic!("expected object");
        };
        assert!(null_check.is_empty());
        assert_eq!(statements[0].projections.len(), fields.len());
    }

    #[test]
    fn joined_collection_groups_by_root_identifier() {
        let query = Queryable::source("Customer").select(
            "c",
            new_object([
                ("id", var("c").member("Id")),
                ("orders", var("c").member("Orders")),
            ]),
        );
        let (statements, shaper) = bind(&query, QuerySplittingBehavior::SingleQuery);
        assert_eq!(1, statements.len());

        let Shaper::Object { fields, .. } = &shaper.root else {
            panic!("expected object");
        };
        let Shaper::Collection(collection) = &fields[1].1 else {
            panic!("expected collection");
        };
        assert_eq!(Some(collection.parent_identifier.clone()), shaper.grouping);
    }

    #[test]
    fn split_statements_numbered_after_root() {
        let query = Queryable::source("Customer").select(
            "c",
            new_object([
                ("orders", var("c").member("Orders")),
                ("again", var("c").member("Orders")),
            ]),
        );
        let (statements, shaper) = bind(&query, QuerySplittingBehavior::SplitQuery);
        assert_eq!(3, statements.len());
        assert!(shaper.grouping.is_none());

        let Shaper::Object { fields, .. } = &shaper.root else {
            panic!("expected object");
        };
        let idxs: Vec<_> = fields
            .iter()
            .map(|(_, f)| match f {
                Shaper::SplitCollection(split) => split.statement,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(vec![1, 2], idxs);
    }
}
