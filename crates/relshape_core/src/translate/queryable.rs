//! Lowering of queryable operators into a select and a shaper.

use std::sync::Arc;

use hashbrown::HashMap;
use relshape_error::{DbError, DbErrorKind, Result};
use tracing::trace;

use super::TranslatorRegistry;
use super::context::CompilationContext;
use super::descriptor::{MemberDescriptor, types};
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::case_expr::WhenThen;
use crate::expr::column_expr::TableRef;
use crate::expr::function_expr::FunctionExpr;
use crate::expr::in_expr::{InExpr, InValues};
use crate::expr::select_expr::{JoinType, OrderingExpr, SelectExpr, TableSource, default_alias};
use crate::expr::subquery_expr::{ExistsExpr, SubqueryExpr};
use crate::expr::{
    SqlExpr, aggregate, and, and_all, arith, case, column, compare, concat, eq, in_list, is_not_null,
    is_null, lit, not, or, param, typed_lit,
};
use crate::metadata::{EntityMetadata, MetadataProvider, NavigationMetadata};
use crate::query::{AggregateFunction, Lambda, QueryExpr, Queryable};
use crate::shaper::{CollectionNavigationExpr, EntityShaperExpr, ShapedQuery, ShaperExpr};
use crate::types::DataType;

/// What a lambda parameter is bound to.
#[derive(Debug, Clone)]
enum Binding {
    Value(ShaperExpr),
    /// Elements of a group, only usable in aggregates.
    Group(ShaperExpr),
}

type Env = HashMap<String, Binding>;

/// Root of a nested collection query, set when translating the query of a
/// collection navigation.
#[derive(Debug)]
struct NavigationRoot {
    target: Arc<EntityMetadata>,
    target_properties: Vec<String>,
    /// Set once the navigation has been translated to a source.
    child_keys: Option<Vec<SqlExpr>>,
}

/// Translates a [`Queryable`] into a [`ShapedQuery`].
#[derive(Debug)]
pub struct QueryableTranslator<'a> {
    metadata: &'a dyn MetadataProvider,
    registry: &'a TranslatorRegistry,
    ctx: &'a mut CompilationContext,
    /// Reference navigations already joined, keyed by the select scope, the
    /// navigation, and the source keys.
    joined_references: HashMap<String, EntityShaperExpr>,
}

impl<'a> QueryableTranslator<'a> {
    pub fn new(
        metadata: &'a dyn MetadataProvider,
        registry: &'a TranslatorRegistry,
        ctx: &'a mut CompilationContext,
    ) -> Self {
        QueryableTranslator {
            metadata,
            registry,
            ctx,
            joined_references: HashMap::new(),
        }
    }

    pub fn translate(&mut self, query: &Queryable) -> Result<ShapedQuery> {
        let mut root = None;
        self.translate_queryable(query, &mut root)
    }

    fn translate_queryable(
        &mut self,
        query: &Queryable,
        root: &mut Option<NavigationRoot>,
    ) -> Result<ShapedQuery> {
        trace!(op = query.operation_name(), "translating queryable");

        match query {
            Queryable::Source { entity } => {
                let entity = self.entity(entity)?;
                Ok(self.translate_source(entity))
            }
            Queryable::Navigation { navigation, .. } => {
                let root = root.as_mut().ok_or_else(|| {
                    DbError::with_kind(
                        DbErrorKind::UnsupportedOperation,
                        "Navigation is only valid as the source of a nested collection",
                    )
                    .with_field("navigation", navigation.clone())
                })?;
                let shaped = self.translate_source(root.target.clone());
                let ShaperExpr::Entity(entity) = &shaped.shaper else {
                    return Err(DbError::internal("Source did not produce an entity"));
                };
                let child_keys = root
                    .target_properties
                    .iter()
                    .map(|name| {
                        entity.property(name).cloned().ok_or_else(|| {
                            DbError::new("Navigation references a missing property")
                                .with_field("property", name.clone())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                root.child_keys = Some(child_keys);
                Ok(shaped)
            }
            Queryable::Where { input, predicate } => {
                let mut shaped = self.translate_queryable(input, root)?;
                self.push_down_if(&mut shaped, |s| s.requires_pushdown())?;

                let env = single_env(predicate, shaped.shaper.clone())?;
                let pred = self.translate_scalar(&predicate.body, &env, &mut shaped.select)?;
                shaped.select.add_predicate(pred);
                Ok(shaped)
            }
            Queryable::Select { input, selector } => {
                let mut shaped = self.translate_queryable(input, root)?;
                self.push_down_if(&mut shaped, |s| s.distinct || !s.group_by.is_empty())?;

                let env = single_env(selector, shaped.shaper.clone())?;
                shaped.shaper = self.translate_expr(&selector.body, &env, &mut shaped.select)?;
                Ok(shaped)
            }
            Queryable::OrderBy {
                input,
                key,
                ascending,
                then,
            } => {
                let mut shaped = self.translate_queryable(input, root)?;
                self.push_down_if(&mut shaped, |s| s.requires_pushdown())?;

                let env = single_env(key, shaped.shaper.clone())?;
                let expr = self.translate_scalar(&key.body, &env, &mut shaped.select)?;
                if !*then {
                    shaped.select.orderings.clear();
                }
                shaped.select.orderings.push(OrderingExpr {
                    expr,
                    ascending: *ascending,
                });
                Ok(shaped)
            }
            Queryable::Skip { input, count } => {
                let mut shaped = self.translate_queryable(input, root)?;
                self.push_down_if(&mut shaped, |s| s.limit.is_some() || s.offset.is_some())?;

                let count = self.translate_scalar(count, &Env::new(), &mut shaped.select)?;
                shaped.select.offset = Some(count);
                Ok(shaped)
            }
            Queryable::Take { input, count } => {
                let mut shaped = self.translate_queryable(input, root)?;
                self.push_down_if(&mut shaped, |s| s.limit.is_some())?;

                let count = self.translate_scalar(count, &Env::new(), &mut shaped.select)?;
                shaped.select.limit = Some(count);
                Ok(shaped)
            }
            Queryable::Distinct { input } => {
                let mut shaped = self.translate_queryable(input, root)?;
                if shaped.shaper.contains_collections() {
                    return Err(DbError::with_kind(
                        DbErrorKind::UnsupportedOperation,
                        "Distinct over results containing collections is not supported",
                    ));
                }
                self.push_down_if(&mut shaped, |s| s.limit.is_some() || s.offset.is_some())?;

                // Row order isn't preserved by DISTINCT.
                shaped.select.orderings.clear();
                shaped.select.distinct = true;
                shaped.select.identifier = shaped.shaper_exprs();
                Ok(shaped)
            }
            Queryable::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let outer = self.translate_queryable(outer, root)?;
                let inner = self.translate_queryable(inner, root)?;
                self.translate_join(outer, inner, outer_key, inner_key, result)
            }
            Queryable::GroupBy { input, key, result } => {
                let mut shaped = self.translate_queryable(input, root)?;
                if shaped.shaper.contains_collections() {
                    return Err(DbError::with_kind(
                        DbErrorKind::UnsupportedOperation,
                        "GroupBy over results containing collections is not supported",
                    ));
                }
                self.push_down_if(&mut shaped, |s| s.requires_pushdown())?;

                let env = single_env(key, shaped.shaper.clone())?;
                let key_shaper = self.translate_expr(&key.body, &env, &mut shaped.select)?;
                let keys = flatten_keys(&key_shaper)?;

                let [key_param, group_param] = result.params.as_slice() else {
                    return Err(DbError::internal("GroupBy result expects two parameters"));
                };
                let mut env = Env::new();
                env.insert(key_param.clone(), Binding::Value(key_shaper));
                env.insert(group_param.clone(), Binding::Group(shaped.shaper.clone()));

                shaped.select.orderings.clear();
                shaped.select.group_by = keys.clone();
                shaped.select.identifier = keys;
                shaped.shaper = self.translate_expr(&result.body, &env, &mut shaped.select)?;
                Ok(shaped)
            }
        }
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityMetadata>> {
        self.metadata
            .entity(name)
            .ok_or_else(|| DbError::new("Unknown entity").with_field("entity", name.to_string()))
    }

    fn translate_source(&mut self, entity: Arc<EntityMetadata>) -> ShapedQuery {
        let mut select = SelectExpr::new(self.ctx.next_scope());
        let table = select.add_table(
            table_alias(&entity.table),
            TableSource::Base {
                schema: entity.schema.clone(),
                name: entity.table.clone(),
            },
            JoinType::From,
        );

        let shaper = entity_shaper(entity, table, false);
        select.identifier = shaper.key_exprs();

        ShapedQuery {
            select,
            shaper: ShaperExpr::Entity(shaper),
        }
    }

    fn push_down_if(
        &mut self,
        shaped: &mut ShapedQuery,
        required: impl Fn(&SelectExpr) -> bool,
    ) -> Result<()> {
        if required(&shaped.select) {
            shaped.push_down(self.ctx.next_scope(), "s")?;
        }
        Ok(())
    }

    fn translate_join(
        &mut self,
        mut outer: ShapedQuery,
        mut inner: ShapedQuery,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> Result<ShapedQuery> {
        if outer.shaper.contains_collections() || inner.shaper.contains_collections() {
            return Err(DbError::with_kind(
                DbErrorKind::UnsupportedOperation,
                "Join over results containing collections is not supported",
            ));
        }
        self.push_down_if(&mut outer, |s| s.requires_pushdown())?;

        let select = &mut outer.select;
        let table_idx = select.tables.len();
        let mut inner_shaper = inner.shaper;
        let inner_identifier;

        if inner.select.is_simple_scan() {
            // Inline the inner table directly.
            let from = inner.select.table_ref(0);
            let to = select.table_ref(table_idx);
            let table = inner.select.tables.remove(0);
            let alias = table.alias.unwrap_or_else(|| "t".to_string());
            select.add_table(alias, table.source, JoinType::Inner(lit(true)));

            inner_shaper.for_each_sql_expr_mut(&mut |expr| remap_table(expr, from, to))?;
            let mut identifier = inner.select.identifier;
            for expr in &mut identifier {
                remap_table(expr, from, to)?;
            }
            inner_identifier = identifier;
        } else {
            let mut derived = inner.select;
            if derived.limit.is_none() && derived.offset.is_none() {
                derived.orderings.clear();
            }
            for expr in inner_shaper.sql_exprs() {
                let alias = default_alias(&expr);
                derived.add_projection(expr, &alias);
            }
            let identifier = std::mem::take(&mut derived.identifier);
            select.add_table(
                "s",
                TableSource::Derived(Box::new(derived)),
                JoinType::Inner(lit(true)),
            );

            inner_shaper.for_each_sql_expr_mut(&mut |expr| {
                let orig = std::mem::replace(expr, lit(0));
                *expr = select.lift_expr(table_idx, orig)?;
                Ok(())
            })?;
            inner_identifier = select.lift_exprs(table_idx, identifier)?;
        }

        let env = single_env(outer_key, outer.shaper.clone())?;
        let outer_keys = self.translate_expr(&outer_key.body, &env, select)?;
        let env = single_env(inner_key, inner_shaper.clone())?;
        let inner_keys = self.translate_expr(&inner_key.body, &env, select)?;

        let outer_keys = flatten_keys(&outer_keys)?;
        let inner_keys = flatten_keys(&inner_keys)?;
        if outer_keys.len() != inner_keys.len() {
            return Err(DbError::new("Join keys have different shapes")
                .with_field("outer", outer_keys.len())
                .with_field("inner", inner_keys.len()));
        }

        let condition = and_all(outer_keys.into_iter().zip(inner_keys).map(|(o, i)| eq(o, i)))
            .unwrap_or_else(|| lit(true));
        select.tables[table_idx].join = JoinType::Inner(condition);

        if select.identifier.is_empty() || inner_identifier.is_empty() {
            select.identifier.clear();
        } else {
            select.identifier.extend(inner_identifier);
        }

        let [outer_param, inner_param] = result.params.as_slice() else {
            return Err(DbError::internal("Join result expects two parameters"));
        };
        let mut env = Env::new();
        env.insert(outer_param.clone(), Binding::Value(outer.shaper.clone()));
        env.insert(inner_param.clone(), Binding::Value(inner_shaper));

        outer.shaper = self.translate_expr(&result.body, &env, select)?;
        Ok(outer)
    }

    fn translate_scalar(&mut self, expr: &QueryExpr, env: &Env, select: &mut SelectExpr) -> Result<SqlExpr> {
        match self.translate_expr(expr, env, select)? {
            ShaperExpr::Projection(sql) => Ok(sql),
            other => Err(DbError::with_kind(
                DbErrorKind::UnsupportedOperation,
                "Expected a scalar expression",
            )
            .with_field("shape", shape_name(&other))),
        }
    }

    fn translate_expr(&mut self, expr: &QueryExpr, env: &Env, select: &mut SelectExpr) -> Result<ShaperExpr> {
        match expr {
            QueryExpr::Constant(value, datatype) => {
                Ok(ShaperExpr::Projection(typed_lit(value.clone(), datatype.clone())))
            }
            QueryExpr::Parameter(name, datatype) => {
                Ok(ShaperExpr::Projection(param(name.clone(), datatype.clone())))
            }
            QueryExpr::Variable(name) => match env.get(name) {
                Some(Binding::Value(shaper)) => Ok(shaper.clone()),
                Some(Binding::Group(_)) => Err(DbError::with_kind(
                    DbErrorKind::UnsupportedOperation,
                    "Groups can only be used in aggregates",
                )
                .with_field("variable", name.clone())),
                None => Err(DbError::new("Unknown variable").with_field("variable", name.clone())),
            },
            QueryExpr::Member { target, member } => self.translate_member(target, member, env, select),
            QueryExpr::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = match receiver {
                    Some(receiver) => Some(self.translate_scalar(receiver, env, select)?),
                    None => None,
                };
                let args = args
                    .iter()
                    .map(|arg| self.translate_scalar(arg, env, select))
                    .collect::<Result<Vec<_>>>()?;

                if let Some(sql) = self
                    .registry
                    .translate_method_call(receiver.as_ref(), method, &args)
                {
                    return Ok(ShaperExpr::Projection(sql));
                }

                if let Some(func) = self.metadata.function(method) {
                    let args = receiver.into_iter().chain(args).collect();
                    return Ok(ShaperExpr::Projection(SqlExpr::Function(FunctionExpr {
                        name: func.sql_name,
                        args,
                        datatype: func.return_type,
                        is_aggregate: func.is_aggregate,
                    })));
                }

                Err(DbError::with_kind(
                    DbErrorKind::UnsupportedOperation,
                    format!("Translation of method '{method}' is not supported"),
                ))
            }
            QueryExpr::Binary { op, left, right } => {
                let left = self.translate_expr(left, env, select)?;
                let right = self.translate_expr(right, env, select)?;
                translate_binary(*op, left, right).map(ShaperExpr::Projection)
            }
            QueryExpr::Not(operand) => {
                let operand = self.translate_scalar(operand, env, select)?;
                Ok(ShaperExpr::Projection(not(operand)))
            }
            QueryExpr::Conditional {
                test,
                then,
                otherwise,
            } => {
                let test = self.translate_scalar(test, env, select)?;
                let then = self.translate_scalar(then, env, select)?;
                let otherwise = self.translate_scalar(otherwise, env, select)?;
                let datatype = if then.is_null_constant() {
                    otherwise.datatype().nullable()
                } else if otherwise.datatype().is_nullable() {
                    then.datatype().nullable()
                } else {
                    then.datatype()
                };
                Ok(ShaperExpr::Projection(case(
                    vec![WhenThen::new(test, then)],
                    Some(otherwise),
                    datatype,
                )))
            }
            QueryExpr::New(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, field)| Ok((name.clone(), self.translate_expr(field, env, select)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ShaperExpr::Object { fields })
            }
            QueryExpr::Collection(query) => {
                let nav = self.translate_collection(query, env, select)?;
                Ok(ShaperExpr::CollectionNavigation(Box::new(nav)))
            }
            QueryExpr::Count(query) => {
                let nav = self.translate_collection(query, env, select)?;
                let mut sub = correlate(nav)?;
                if sub.select.requires_pushdown() {
                    sub.push_down(self.ctx.next_scope(), "s")?;
                }
                sub.select.projections.clear();
                sub.select.orderings.clear();
                sub.select
                    .add_projection(aggregate("COUNT", Vec::new(), DataType::Int32), "c");
                Ok(ShaperExpr::Projection(SqlExpr::Subquery(SubqueryExpr {
                    subquery: Box::new(sub.select),
                    datatype: DataType::Int32,
                })))
            }
            QueryExpr::Any(query) => {
                let nav = self.translate_collection(query, env, select)?;
                let mut sub = correlate(nav)?;
                if sub.select.limit.is_none() && sub.select.offset.is_none() {
                    sub.select.orderings.clear();
                }
                sub.select.projections.clear();
                Ok(ShaperExpr::Projection(SqlExpr::Exists(ExistsExpr {
                    subquery: Box::new(sub.select),
                    negated: false,
                })))
            }
            QueryExpr::Aggregate {
                function,
                group,
                selector,
            } => self.translate_aggregate(*function, group, selector.as_deref(), env, select),
            QueryExpr::Contains { values, needle } => {
                let values = self.translate_scalar(values, env, select)?;
                let needle = self.translate_scalar(needle, env, select)?;
                match values {
                    SqlExpr::Parameter(param) => Ok(ShaperExpr::Projection(SqlExpr::In(InExpr {
                        needle: Box::new(needle),
                        values: InValues::Parameter(param),
                        negated: false,
                    }))),
                    SqlExpr::Constant(constant) => {
                        let values = constant
                            .value
                            .try_as_list()?
                            .iter()
                            .map(|v| lit(v.clone()))
                            .collect::<Vec<_>>();
                        if values.is_empty() {
                            return Ok(ShaperExpr::Projection(lit(false)));
                        }
                        Ok(ShaperExpr::Projection(in_list(needle, values)))
                    }
                    other => Err(DbError::with_kind(
                        DbErrorKind::UnsupportedOperation,
                        "Contains requires a constant or parameter collection",
                    )
                    .with_field("values", other.to_string())),
                }
            }
        }
    }

    fn translate_member(
        &mut self,
        target: &QueryExpr,
        member: &str,
        env: &Env,
        select: &mut SelectExpr,
    ) -> Result<ShaperExpr> {
        let unknown = |shape: &str| {
            DbError::with_kind(DbErrorKind::UnsupportedOperation, "Unknown member")
                .with_field("member", member.to_string())
                .with_field("on", shape.to_string())
        };

        match self.translate_expr(target, env, select)? {
            ShaperExpr::Entity(entity) => {
                if let Some(expr) = entity.property(member) {
                    return Ok(ShaperExpr::Projection(expr.clone()));
                }
                let nav = entity
                    .entity
                    .navigation(member)
                    .cloned()
                    .ok_or_else(|| unknown(&entity.entity.name))?;
                if nav.is_collection {
                    let query = Queryable::navigation(target.clone(), member);
                    let nav = self.translate_collection(&query, env, select)?;
                    return Ok(ShaperExpr::CollectionNavigation(Box::new(nav)));
                }
                let joined = self.join_reference(&entity, &nav, select)?;
                Ok(ShaperExpr::Entity(joined))
            }
            ShaperExpr::Object { fields } => fields
                .into_iter()
                .find(|(name, _)| name == member)
                .map(|(_, field)| field)
                .ok_or_else(|| unknown("object")),
            ShaperExpr::Projection(instance) => {
                let datatype = instance.datatype();
                let descriptor = MemberDescriptor::new(declaring_type_for(&datatype, member), member);
                self.registry
                    .translate_member(&instance, &descriptor)
                    .map(ShaperExpr::Projection)
                    .ok_or_else(|| {
                        DbError::with_kind(
                            DbErrorKind::UnsupportedOperation,
                            format!("Translation of member '{descriptor}' is not supported"),
                        )
                    })
            }
            other => Err(unknown(shape_name(&other))),
        }
    }

    /// Join the target of a reference navigation into the select.
    fn join_reference(
        &mut self,
        source: &EntityShaperExpr,
        nav: &NavigationMetadata,
        select: &mut SelectExpr,
    ) -> Result<EntityShaperExpr> {
        let source_keys = navigation_keys(source, &nav.source_properties)?;

        let cache_key = format!(
            "{}:{}:{}",
            select.scope,
            nav.name,
            source_keys
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        if let Some(existing) = self.joined_references.get(&cache_key) {
            return Ok(existing.clone());
        }

        let target = self.entity(&nav.target)?;
        let table_idx = select.tables.len();
        let left_join = !nav.required;
        let table = select.add_table(
            table_alias(&target.table),
            TableSource::Base {
                schema: target.schema.clone(),
                name: target.table.clone(),
            },
            JoinType::Inner(lit(true)),
        );

        let joined = entity_shaper(target, table, left_join || source.nullable);
        let target_keys = navigation_keys(&joined, &nav.target_properties)?;
        let condition = and_all(source_keys.into_iter().zip(target_keys).map(|(s, t)| eq(s, t)))
            .ok_or_else(|| DbError::new("Navigation has no key properties"))?;

        select.tables[table_idx].join = if left_join {
            JoinType::LeftOuter(condition)
        } else {
            JoinType::Inner(condition)
        };

        self.joined_references.insert(cache_key, joined.clone());
        Ok(joined)
    }

    /// Translate the query of a nested collection rooted at a navigation.
    fn translate_collection(
        &mut self,
        query: &Queryable,
        env: &Env,
        select: &mut SelectExpr,
    ) -> Result<CollectionNavigationExpr> {
        let (source, navigation) = root_navigation(query).ok_or_else(|| {
            DbError::with_kind(
                DbErrorKind::UnsupportedOperation,
                "Nested collections must be rooted at a collection navigation",
            )
        })?;

        let ShaperExpr::Entity(parent) = self.translate_expr(source, env, select)? else {
            return Err(DbError::with_kind(
                DbErrorKind::UnsupportedOperation,
                "Collection navigation source is not an entity",
            )
            .with_field("navigation", navigation.to_string()));
        };
        let nav = parent
            .entity
            .navigation(navigation)
            .filter(|nav| nav.is_collection)
            .cloned()
            .ok_or_else(|| {
                DbError::with_kind(DbErrorKind::UnsupportedOperation, "Unknown collection navigation")
                    .with_field("navigation", navigation.to_string())
            })?;
        let parent_keys = navigation_keys(&parent, &nav.source_properties)?;

        let mut root = Some(NavigationRoot {
            target: self.entity(&nav.target)?,
            target_properties: nav.target_properties.clone(),
            child_keys: None,
        });

        // Nested queries get a fresh environment, references to the
        // enclosing query go through the correlation keys.
        let mut nested = QueryableTranslator::new(self.metadata, self.registry, &mut *self.ctx);
        let shaped = nested.translate_queryable(query, &mut root)?;

        let child_keys = root
            .and_then(|root| root.child_keys)
            .ok_or_else(|| DbError::internal("Nested collection did not translate its navigation"))?;

        Ok(CollectionNavigationExpr {
            navigation: nav.name,
            query: shaped,
            parent_keys,
            child_keys,
        })
    }

    fn translate_aggregate(
        &mut self,
        function: AggregateFunction,
        group: &str,
        selector: Option<&Lambda>,
        env: &Env,
        select: &mut SelectExpr,
    ) -> Result<ShaperExpr> {
        let element = match env.get(group) {
            Some(Binding::Group(element)) => element.clone(),
            _ => {
                return Err(DbError::with_kind(
                    DbErrorKind::UnsupportedOperation,
                    "Aggregates require a group",
                )
                .with_field("group", group.to_string()));
            }
        };

        let input = match selector {
            Some(selector) => {
                let env = single_env(selector, element)?;
                Some(self.translate_scalar(&selector.body, &env, select)?)
            }
            None => match element {
                ShaperExpr::Projection(expr) => Some(expr),
                _ => None,
            },
        };

        let expr = match (function, input) {
            (AggregateFunction::Count, _) => aggregate("COUNT", Vec::new(), DataType::Int32),
            (AggregateFunction::Average, Some(input)) => {
                aggregate("AVG", vec![input], DataType::Float64)
            }
            (AggregateFunction::Sum, Some(input)) => {
                let datatype = input.datatype();
                aggregate("SUM", vec![input], datatype)
            }
            (AggregateFunction::Min, Some(input)) => {
                let datatype = input.datatype();
                aggregate("MIN", vec![input], datatype)
            }
            (AggregateFunction::Max, Some(input)) => {
                let datatype = input.datatype();
                aggregate("MAX", vec![input], datatype)
            }
            (function, None) => {
                return Err(DbError::with_kind(
                    DbErrorKind::UnsupportedOperation,
                    "Aggregate requires a scalar selector",
                )
                .with_field("function", function.to_string()));
            }
        };

        Ok(ShaperExpr::Projection(expr))
    }
}

fn single_env(lambda: &Lambda, shaper: ShaperExpr) -> Result<Env> {
    let [param] = lambda.params.as_slice() else {
        return Err(DbError::internal("Expected a single parameter lambda")
            .with_field("params", lambda.params.len()));
    };
    let mut env = Env::new();
    env.insert(param.clone(), Binding::Value(shaper));
    Ok(env)
}

fn entity_shaper(entity: Arc<EntityMetadata>, table: TableRef, nullable: bool) -> EntityShaperExpr {
    let properties = entity
        .properties
        .iter()
        .map(|prop| {
            let datatype = if nullable {
                prop.datatype().nullable()
            } else {
                prop.datatype()
            };
            column(table, prop.column.clone(), datatype)
        })
        .collect();

    EntityShaperExpr {
        entity,
        properties,
        nullable,
    }
}

fn navigation_keys(entity: &EntityShaperExpr, properties: &[String]) -> Result<Vec<SqlExpr>> {
    properties
        .iter()
        .map(|name| {
            entity.property(name).cloned().ok_or_else(|| {
                DbError::new("Navigation references a missing property")
                    .with_field("entity", entity.entity.name.clone())
                    .with_field("property", name.clone())
            })
        })
        .collect()
}

/// Find the navigation a nested collection query is rooted at.
fn root_navigation(query: &Queryable) -> Option<(&QueryExpr, &str)> {
    match query {
        Queryable::Navigation { source, navigation } => Some((source, navigation)),
        Queryable::Source { .. } => None,
        Queryable::Where { input, .. }
        | Queryable::Select { input, .. }
        | Queryable::OrderBy { input, .. }
        | Queryable::Skip { input, .. }
        | Queryable::Take { input, .. }
        | Queryable::Distinct { input }
        | Queryable::GroupBy { input, .. } => root_navigation(input),
        Queryable::Join { outer, .. } => root_navigation(outer),
    }
}

/// Turn a collection navigation into a correlated subquery.
fn correlate(nav: CollectionNavigationExpr) -> Result<ShapedQuery> {
    let mut query = nav.query;
    let condition = and_all(nav.child_keys.into_iter().zip(nav.parent_keys).map(|(c, p)| eq(c, p)))
        .ok_or_else(|| DbError::new("Collection navigation has no correlation keys"))?;
    query.select.add_predicate(condition);
    Ok(query)
}

/// Flatten a key selector into its SQL expressions.
fn flatten_keys(shaper: &ShaperExpr) -> Result<Vec<SqlExpr>> {
    match shaper {
        ShaperExpr::Projection(expr) => Ok(vec![expr.clone()]),
        ShaperExpr::Entity(entity) => Ok(entity.key_exprs()),
        ShaperExpr::Object { fields } => {
            let mut keys = Vec::new();
            for (_, field) in fields {
                keys.extend(flatten_keys(field)?);
            }
            Ok(keys)
        }
        other => Err(DbError::with_kind(
            DbErrorKind::UnsupportedOperation,
            "Keys cannot contain collections",
        )
        .with_field("shape", shape_name(other))),
    }
}

fn translate_binary(op: BinaryOperator, left: ShaperExpr, right: ShaperExpr) -> Result<SqlExpr> {
    match (left, right) {
        (ShaperExpr::Projection(left), ShaperExpr::Projection(right)) => Ok(scalar_binary(op, left, right)),
        // Entity comparisons compare keys.
        (ShaperExpr::Entity(left), ShaperExpr::Entity(right)) if is_equality(op) => {
            let keys = left
                .key_exprs()
                .into_iter()
                .zip(right.key_exprs())
                .map(|(l, r)| eq(l, r));
            let equal = and_all(keys).ok_or_else(|| DbError::new("Entity has no key"))?;
            Ok(if op == BinaryOperator::Eq { equal } else { not(equal) })
        }
        (ShaperExpr::Entity(entity), ShaperExpr::Projection(other))
        | (ShaperExpr::Projection(other), ShaperExpr::Entity(entity))
            if is_equality(op) && other.is_null_constant() =>
        {
            let key = entity
                .key_exprs()
                .into_iter()
                .next()
                .ok_or_else(|| DbError::new("Entity has no key"))?;
            Ok(if op == BinaryOperator::Eq {
                is_null(key)
            } else {
                is_not_null(key)
            })
        }
        (left, right) => Err(DbError::with_kind(
            DbErrorKind::UnsupportedOperation,
            format!("Operator '{}' is not supported for these operands", op.as_sql()),
        )
        .with_field("left", shape_name(&left))
        .with_field("right", shape_name(&right))),
    }
}

fn scalar_binary(op: BinaryOperator, left: SqlExpr, right: SqlExpr) -> SqlExpr {
    if op.is_comparison() {
        return compare(op, left, right);
    }
    match op {
        BinaryOperator::And => and(left, right),
        BinaryOperator::Or => or(left, right),
        BinaryOperator::Add if left.datatype().is_utf8() || right.datatype().is_utf8() => {
            concat(left, right)
        }
        op => arith(op, left, right),
    }
}

fn is_equality(op: BinaryOperator) -> bool {
    matches!(op, BinaryOperator::Eq | BinaryOperator::NotEq)
}

/// Point column references at another table, including references from
/// nested subqueries.
fn remap_table(expr: &mut SqlExpr, from: TableRef, to: TableRef) -> Result<()> {
    if let SqlExpr::Column(col) = expr {
        if col.table == from {
            col.table = to;
        }
        return Ok(());
    }
    expr.for_each_subquery_mut(&mut |subquery| {
        subquery.walk_selects_mut(&mut |select| {
            select.for_each_expr_mut(&mut |expr| remap_table(expr, from, to))
        })
    })?;
    expr.for_each_child_mut(&mut |child| remap_table(child, from, to))
}

/// Pick the type members are looked up on for a value of some type.
fn declaring_type_for(datatype: &DataType, member: &str) -> &'static str {
    if datatype.is_nullable() && matches!(member, "Value" | "HasValue") {
        return types::NULLABLE;
    }
    match datatype.strip_nullable() {
        DataType::Utf8 => types::STRING,
        DataType::Binary => types::BYTES,
        DataType::Boolean => types::BOOLEAN,
        DataType::Enum(_) => types::ENUM,
        other if other.is_numeric() => types::NUMBER,
        _ => types::OBJECT,
    }
}

/// Default alias for a table, the lowercased first letter of its name.
fn table_alias(table: &str) -> String {
    table
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}

fn shape_name(shaper: &ShaperExpr) -> &'static str {
    match shaper {
        ShaperExpr::Projection(_) => "scalar",
        ShaperExpr::Entity(_) => "entity",
        ShaperExpr::Object { .. } => "object",
        ShaperExpr::CollectionNavigation(_)
        | ShaperExpr::Collection(_)
        | ShaperExpr::SplitCollection(_) => "collection",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::session::QuerySplittingBehavior;
    use crate::query::{constant, new_object, parameter, var};
    use crate::testutil::TestModel;
    use crate::translate::context::NopDiagnostics;
    use crate::translate::descriptor::methods;

    fn translate(query: &Queryable) -> Result<ShapedQuery> {
        let model = TestModel::new();
        let registry = TranslatorRegistry::with_builtins();
        let mut ctx = CompilationContext::new(
            QuerySplittingBehavior::Unspecified,
            Arc::new(NopDiagnostics),
        );
        QueryableTranslator::new(&model, &registry, &mut ctx).translate(query)
    }

    #[test]
    fn source_entity() {
        let shaped = translate(&Queryable::source("Customer")).unwrap();
        let ShaperExpr::Entity(entity) = &shaped.shaper else {
            panic!("expected entity, got {:?}", shaped.shaper);
        };
        assert_eq!("Customer", entity.entity.name);
        assert_eq!(1, shaped.select.tables.len());
        assert_eq!(Some("c"), shaped.select.tables[0].alias.as_deref());
        assert_eq!(entity.key_exprs(), shaped.select.identifier);
    }

    #[test]
    fn where_ands_predicates() {
        let query = Queryable::source("Customer")
            .filter("c", var("c").member("Name").not_eq(constant("a")))
            .filter("c", var("c").member("Id").gt(constant(3)));
        let shaped = translate(&query).unwrap();
        let pred = shaped.select.predicate.unwrap();
        assert!(matches!(
            pred,
            SqlExpr::Binary(ref b) if b.op == BinaryOperator::And
        ));
    }

    #[test]
    fn where_after_take_pushes_down() {
        let query = Queryable::source("Customer")
            .take(constant(10))
            .filter("c", var("c").member("Id").gt(constant(3)));
        let shaped = translate(&query).unwrap();

        assert!(shaped.select.limit.is_none());
        let derived = shaped.select.tables[0].as_derived().unwrap();
        assert_eq!(Some(lit(10)), derived.limit);
        assert!(shaped.select.predicate.is_some());
    }

    #[test]
    fn reference_navigation_joins_once() {
        let query = Queryable::source("Order").select(
            "o",
            new_object([
                ("a", var("o").member("Customer").member("Name")),
                ("b", var("o").member("Customer").member("Id")),
            ]),
        );
        let shaped = translate(&query).unwrap();
        assert_eq!(2, shaped.select.tables.len());
        assert!(matches!(shaped.select.tables[1].join, JoinType::Inner(_)));
    }

    #[test]
    fn unsupported_method_names_operation() {
        let query = Queryable::source("Customer").filter(
            "c",
            var("c").member("Name").call(methods::MATH_ABS, vec![]),
        );
        let err = translate(&query).unwrap_err();
        assert_eq!(DbErrorKind::UnsupportedOperation, err.kind());
        assert!(err.get_msg().contains("Abs"), "{}", err.get_msg());
    }

    #[test]
    fn collection_navigation_correlates() {
        let query = Queryable::source("Customer").select(
            "c",
            new_object([
                ("id", var("c").member("Id")),
                ("orders", var("c").member("Orders")),
            ]),
        );
        let shaped = translate(&query).unwrap();
        let ShaperExpr::Object { fields } = &shaped.shaper else {
            panic!("expected object");
        };
        let ShaperExpr::CollectionNavigation(nav) = &fields[1].1 else {
            panic!("expected navigation, got {:?}", fields[1].1);
        };
        assert_eq!("Orders", nav.navigation);
        assert_eq!(1, nav.parent_keys.len());
        assert_eq!(1, nav.child_keys.len());
        assert_ne!(shaped.select.scope, nav.query.select.scope);
    }

    #[test]
    fn count_produces_subquery() {
        let query = Queryable::source("Customer").select(
            "c",
            QueryExpr::Count(Box::new(Queryable::navigation(var("c"), "Orders"))),
        );
        let shaped = translate(&query).unwrap();
        let ShaperExpr::Projection(SqlExpr::Subquery(sub)) = &shaped.shaper else {
            panic!("expected subquery, got {:?}", shaped.shaper);
        };
        assert_eq!(DataType::Int32, sub.datatype);
        assert!(sub.subquery.predicate.is_some());
    }

    #[test]
    fn contains_parameter() {
        let query = Queryable::source("Customer").filter(
            "c",
            QueryExpr::Contains {
                values: Box::new(parameter("ids", DataType::List(Box::new(DataType::Int32)))),
                needle: Box::new(var("c").member("Id")),
            },
        );
        let shaped = translate(&query).unwrap();
        assert!(matches!(
            shaped.select.predicate,
            Some(SqlExpr::In(InExpr {
                values: InValues::Parameter(_),
                ..
            }))
        ));
    }

    #[test]
    fn group_by_aggregates() {
        let query = Queryable::source("Order").group_by(
            Lambda::new("o", var("o").member("CustomerId")),
            Lambda::new2(
                "k",
                "g",
                new_object([
                    ("key", var("k")),
                    (
                        "count",
                        QueryExpr::Aggregate {
                            function: AggregateFunction::Count,
                            group: "g".to_string(),
                            selector: None,
                        },
                    ),
                ]),
            ),
        );
        let shaped = translate(&query).unwrap();
        assert_eq!(1, shaped.select.group_by.len());
        assert_eq!(shaped.select.group_by, shaped.select.identifier);
    }

    #[test]
    fn string_concat_with_add() {
        let query = Queryable::source("Customer")
            .select("c", var("c").member("Name").binary(BinaryOperator::Add, constant("!")));
        let shaped = translate(&query).unwrap();
        let ShaperExpr::Projection(expr) = shaped.shaper else {
            panic!("expected projection");
        };
        assert!(matches!(expr, SqlExpr::Binary(ref b) if b.op == BinaryOperator::Concat));
    }
}
