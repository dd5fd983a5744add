use std::collections::BTreeMap;

use relshape_error::{DbError, OptionExt, Result};
use tracing::trace;

use super::apply_expression_rule_to_select;
use super::null_compare::NullCompareRewrite;
use crate::config::session::ParameterizedCollectionMode;
use crate::expr::binary_expr::{BinaryExpr, BinaryOperator};
use crate::expr::in_expr::{InExpr, InValues};
use crate::expr::literal_expr::ParameterExpr;
use crate::expr::select_expr::SelectExpr;
use crate::expr::{SqlExpr, and, is_not_null, is_null, lit, null, or, typed_lit};
use crate::scalar::ScalarValue;
use crate::types::DataType;

/// Parameter values for a single execution, keyed by parameter name.
pub type ParameterValues = BTreeMap<String, ScalarValue>;

/// Rewrites a compiled statement once the parameter values for an execution
/// are known.
///
/// - Comparisons against null valued parameters become null tests.
/// - Array parameters used with IN are expanded into a list.
///
/// The result is only reusable for executions sharing the same parameter
/// fingerprint, and only when `can_cache` is still set afterwards.
#[derive(Debug)]
pub struct ParameterProcessor<'a> {
    values: &'a ParameterValues,
    mode: ParameterizedCollectionMode,
    can_cache: bool,
}

impl<'a> ParameterProcessor<'a> {
    pub fn new(values: &'a ParameterValues, mode: ParameterizedCollectionMode) -> Self {
        ParameterProcessor {
            values,
            mode,
            can_cache: true,
        }
    }

    /// Process a statement, returning the rewritten statement and if the
    /// result can be cached.
    pub fn process(mut self, mut select: SelectExpr) -> Result<(SelectExpr, bool)> {
        select.walk_selects_mut(&mut |select| {
            select.for_each_expr_mut(&mut |expr| {
                let orig = std::mem::replace(expr, lit(0));
                *expr = self.rewrite_expr(orig)?;
                Ok(())
            })
        })?;

        // Substituted nulls get folded into null tests.
        apply_expression_rule_to_select::<NullCompareRewrite>(&mut select)?;

        Ok((select, self.can_cache))
    }

    fn rewrite_expr(&mut self, mut expr: SqlExpr) -> Result<SqlExpr> {
        expr.for_each_child_mut(&mut |child| {
            let orig = std::mem::replace(child, lit(0));
            *child = self.rewrite_expr(orig)?;
            Ok(())
        })?;

        match expr {
            SqlExpr::Binary(BinaryExpr {
                op: op @ (BinaryOperator::Eq | BinaryOperator::NotEq),
                left,
                right,
                datatype,
            }) => Ok(SqlExpr::Binary(BinaryExpr {
                op,
                left: Box::new(self.substitute_null(*left)),
                right: Box::new(self.substitute_null(*right)),
                datatype,
            })),
            SqlExpr::In(InExpr {
                needle,
                values: InValues::Parameter(param),
                negated,
            }) => self.expand_in(*needle, param, negated),
            other => Ok(other),
        }
    }

    /// Replace a parameter with a null constant if its value is null.
    fn substitute_null(&self, expr: SqlExpr) -> SqlExpr {
        match expr {
            SqlExpr::Parameter(param)
                if self
                    .values
                    .get(&param.name)
                    .is_some_and(|v| v.is_null()) =>
            {
                null(param.datatype)
            }
            other => other,
        }
    }

    fn expand_in(&mut self, needle: SqlExpr, param: ParameterExpr, negated: bool) -> Result<SqlExpr> {
        let value = self
            .values
            .get(&param.name)
            .required("value for array parameter")
            .map_err(|e| e.with_field("parameter", param.name.clone()))?;

        let elements: &[ScalarValue] = match value {
            ScalarValue::Null => &[],
            other => other.try_as_list()?,
        };

        let element_type = match param.datatype.strip_nullable() {
            DataType::List(inner) => inner.as_ref().clone(),
            other => {
                return Err(DbError::new("Parameter used with IN is not an array")
                    .with_field("parameter", param.name.clone())
                    .with_field("datatype", other.to_string()));
            }
        };

        let has_nulls = elements.iter().any(|v| v.is_null());

        let list: Vec<SqlExpr> = if self.mode == ParameterizedCollectionMode::Parameters && !has_nulls {
            (0..elements.len())
                .map(|idx| {
                    SqlExpr::Parameter(ParameterExpr {
                        name: param.name.clone(),
                        datatype: element_type.clone(),
                        element: Some(idx),
                    })
                })
                .collect()
        } else {
            // Text depends on the values, never reuse it.
            self.can_cache = false;
            elements
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| typed_lit(v.clone(), element_type.clone()))
                .collect()
        };

        trace!(parameter = %param.name, elements = elements.len(), has_nulls, "expanded array parameter");

        let in_expr = if list.is_empty() {
            None
        } else {
            Some(SqlExpr::In(InExpr {
                needle: Box::new(needle.clone()),
                values: InValues::List(list),
                negated,
            }))
        };

        Ok(match (in_expr, has_nulls, negated) {
            (None, false, _) => lit(negated),
            (None, true, false) => is_null(needle),
            (None, true, true) => is_not_null(needle),
            (Some(in_expr), false, _) => in_expr,
            (Some(in_expr), true, false) => or(in_expr, is_null(needle)),
            (Some(in_expr), true, true) => and(in_expr, is_not_null(needle)),
        })
    }
}
