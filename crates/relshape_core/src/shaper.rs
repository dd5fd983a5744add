//! Shapers describe how flat rows become object graphs.
//!
//! [`ShaperExpr`] is the compile time form, referencing SQL expressions.
//! Binding the projections of the final select turns it into a [`Shaper`],
//! referencing row positions instead.

use std::fmt;
use std::sync::Arc;

use relshape_error::Result;

use crate::expr::column_expr::ScopeId;
use crate::expr::select_expr::{
    JoinType, OrderingExpr, SelectExpr, TableSource, default_alias,
};
use crate::expr::{SqlExpr, lit};
use crate::metadata::EntityMetadata;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityShaperExpr {
    pub entity: Arc<EntityMetadata>,
    /// Expressions for each property, positionally matching the entity's
    /// properties.
    pub properties: Vec<SqlExpr>,
    /// If the entity may be absent (e.g. the optional side of a left join).
    pub nullable: bool,
}

impl EntityShaperExpr {
    pub fn property(&self, name: &str) -> Option<&SqlExpr> {
        self.entity
            .property_index(name)
            .and_then(|idx| self.properties.get(idx))
    }

    /// Expressions for the primary key properties.
    pub fn key_exprs(&self) -> Vec<SqlExpr> {
        self.entity
            .primary_key
            .iter()
            .filter_map(|name| self.property(name).cloned())
            .collect()
    }
}

/// A collection navigation not yet planned into joins or split statements.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionNavigationExpr {
    pub navigation: String,
    pub query: ShapedQuery,
    /// Correlation keys in the parent's scope.
    pub parent_keys: Vec<SqlExpr>,
    /// Correlation keys in the child query's scope, positionally matching
    /// `parent_keys`.
    pub child_keys: Vec<SqlExpr>,
}

/// A collection joined into the parent select.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionShaperExpr {
    pub collection_id: usize,
    pub parent_identifier: Vec<SqlExpr>,
    pub outer_identifier: Vec<SqlExpr>,
    pub self_identifier: Vec<SqlExpr>,
    pub element: ShaperExpr,
}

/// A collection read from its own statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitCollectionShaperExpr {
    pub collection_id: usize,
    /// Identifier of the parent in the parent statement's scope.
    pub parent_identifier: Vec<SqlExpr>,
    /// The parent identifier as projected by this collection's statement.
    pub child_identifier: Vec<SqlExpr>,
    pub self_identifier: Vec<SqlExpr>,
    pub element: ShaperExpr,
    pub statement: SelectExpr,
    /// If the statement is ordered by the parent identifier first, letting
    /// stale rows be detected by comparing identifiers.
    pub ordered_by_identifier: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaperExpr {
    /// A single projected value.
    Projection(SqlExpr),
    Entity(EntityShaperExpr),
    Object {
        fields: Vec<(String, ShaperExpr)>,
    },
    CollectionNavigation(Box<CollectionNavigationExpr>),
    Collection(Box<CollectionShaperExpr>),
    SplitCollection(Box<SplitCollectionShaperExpr>),
}

impl ShaperExpr {
    /// Visit all SQL expressions evaluated against the select this shaper
    /// belongs to.
    ///
    /// Expressions belonging to other selects (a navigation's query, or a
    /// split collection's statement) aren't visited.
    pub fn for_each_sql_expr_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut SqlExpr) -> Result<()>,
    {
        match self {
            Self::Projection(expr) => f(expr),
            Self::Entity(entity) => {
                for expr in &mut entity.properties {
                    f(expr)?;
                }
                Ok(())
            }
            Self::Object { fields } => {
                for (_, field) in fields {
                    field.for_each_sql_expr_mut(f)?;
                }
                Ok(())
            }
            Self::CollectionNavigation(nav) => {
                for expr in &mut nav.parent_keys {
                    f(expr)?;
                }
                Ok(())
            }
            Self::Collection(collection) => {
                for expr in collection
                    .parent_identifier
                    .iter_mut()
                    .chain(collection.outer_identifier.iter_mut())
                    .chain(collection.self_identifier.iter_mut())
                {
                    f(expr)?;
                }
                collection.element.for_each_sql_expr_mut(f)
            }
            Self::SplitCollection(split) => {
                for expr in &mut split.parent_identifier {
                    f(expr)?;
                }
                Ok(())
            }
        }
    }

    /// Collect the expressions visited by `for_each_sql_expr_mut`.
    pub fn sql_exprs(&self) -> Vec<SqlExpr> {
        let mut shaper = self.clone();
        let mut exprs = Vec::new();
        // Collecting never fails.
        let _ = shaper.for_each_sql_expr_mut(&mut |expr| {
            exprs.push(expr.clone());
            Ok(())
        });
        exprs
    }

    /// Count collection navigations not yet planned, excluding nested ones.
    pub fn count_navigations(&self) -> usize {
        match self {
            Self::CollectionNavigation(_) => 1,
            Self::Object { fields } => fields.iter().map(|(_, f)| f.count_navigations()).sum(),
            _ => 0,
        }
    }

    pub fn contains_collections(&self) -> bool {
        match self {
            Self::Collection(_) | Self::SplitCollection(_) | Self::CollectionNavigation(_) => true,
            Self::Object { fields } => fields.iter().any(|(_, f)| f.contains_collections()),
            Self::Projection(_) | Self::Entity(_) => false,
        }
    }
}

/// A select along with the shaper for its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedQuery {
    pub select: SelectExpr,
    pub shaper: ShaperExpr,
}

/// Runtime shaper, positions refer to row values.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaper {
    Scalar(usize),
    Object {
        fields: Vec<(String, Shaper)>,
        /// If all of these values are null, the object is null.
        null_check: Vec<usize>,
    },
    Collection(Box<CollectionShaper>),
    SplitCollection(Arc<SplitCollectionShaper>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionShaper {
    pub collection_id: usize,
    pub parent_identifier: Vec<usize>,
    pub outer_identifier: Vec<usize>,
    pub self_identifier: Vec<usize>,
    pub element: Shaper,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitCollectionShaper {
    pub collection_id: usize,
    /// Index of the statement producing this collection's rows.
    pub statement: usize,
    /// Positions in the parent's rows.
    pub parent_identifier: Vec<usize>,
    /// Positions in this statement's rows holding the parent identifier.
    pub child_identifier: Vec<usize>,
    pub self_identifier: Vec<usize>,
    pub element: Shaper,
    pub ordered_by_identifier: bool,
}

/// Shaper for a full query result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultShaper {
    pub root: Shaper,
    /// Positions of the root identifier when rows of the root statement need
    /// to be grouped (collections were joined in).
    pub grouping: Option<Vec<usize>>,
}

impl Shaper {
    /// Get a field of an object shaper.
    pub fn field(&self, name: &str) -> Option<&Shaper> {
        match self {
            Self::Object { fields, .. } => fields.iter().find(|(n, _)| n == name).map(|(_, f)| f),
            _ => None,
        }
    }
}

impl fmt::Display for Shaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(idx) => write!(f, "${idx}"),
            Self::Object { fields, .. } => {
                write!(f, "{{")?;
                for (idx, (name, field)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {field}")?;
                }
                write!(f, "}}")
            }
            Self::Collection(c) => write!(f, "collection#{}[{}]", c.collection_id, c.element),
            Self::SplitCollection(c) => {
                write!(f, "split#{}(stmt {})[{}]", c.collection_id, c.statement, c.element)
            }
        }
    }
}

impl ShapedQuery {
    /// Collect every SQL expression the shaper evaluates against the select.
    pub fn shaper_exprs(&self) -> Vec<SqlExpr> {
        self.shaper.sql_exprs()
    }

    /// Push the select into a derived table of a new select.
    ///
    /// Needed before joining to a select whose result would change by the
    /// join (DISTINCT, GROUP BY, LIMIT, OFFSET). Everything the shaper reads
    /// gets projected from the derived table, orderings and the identifier
    /// are lifted.
    pub fn push_down(&mut self, scope: ScopeId, alias: impl Into<String>) -> Result<()> {
        let mut inner = std::mem::replace(&mut self.select, SelectExpr::new(scope));

        for expr in self.shaper_exprs() {
            let alias = default_alias(&expr);
            inner.add_projection(expr, &alias);
        }

        let limited = inner.limit.is_some() || inner.offset.is_some();
        let orderings = if limited {
            inner.orderings.clone()
        } else {
            std::mem::take(&mut inner.orderings)
        };

        let identifier = if inner.distinct {
            inner.projections.iter().map(|p| p.expr.clone()).collect()
        } else if !inner.group_by.is_empty() {
            inner.group_by.clone()
        } else {
            std::mem::take(&mut inner.identifier)
        };
        inner.identifier.clear();

        let outer = &mut self.select;
        let table_idx = outer.tables.len();
        outer.add_table(alias, TableSource::Derived(Box::new(inner)), JoinType::From);

        self.shaper.for_each_sql_expr_mut(&mut |expr| {
            let orig = std::mem::replace(expr, lit(0));
            *expr = outer.lift_expr(table_idx, orig)?;
            Ok(())
        })?;

        for ordering in orderings {
            let expr = outer.lift_expr(table_idx, ordering.expr)?;
            outer.orderings.push(OrderingExpr {
                expr,
                ascending: ordering.ascending,
            });
        }

        outer.identifier = outer.lift_exprs(table_idx, identifier)?;

        Ok(())
    }
}
