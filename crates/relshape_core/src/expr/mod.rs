//! SQL shaped expression tree.
//!
//! Produced by translation, rewritten by the passes in `rewrite`, and rendered
//! to text by `sqlgen`.

pub mod binary_expr;
pub mod case_expr;
pub mod collate_expr;
pub mod column_expr;
pub mod function_expr;
pub mod in_expr;
pub mod integrity;
pub mod like_expr;
pub mod literal_expr;
pub mod row_value_expr;
pub mod select_expr;
pub mod subquery_expr;
pub mod unary_expr;
pub mod window_expr;

use std::fmt;

use binary_expr::{BinaryExpr, BinaryOperator};
use case_expr::{CaseExpr, WhenThen};
use collate_expr::CollateExpr;
use column_expr::{ColumnExpr, TableRef};
use function_expr::FunctionExpr;
use in_expr::{InExpr, InValues};
use like_expr::LikeExpr;
use literal_expr::{ConstantExpr, ParameterExpr};
use relshape_error::Result;
use row_value_expr::RowValueExpr;
use select_expr::SelectExpr;
use subquery_expr::{ExistsExpr, SubqueryExpr};
use unary_expr::{UnaryExpr, UnaryOperator};
use window_expr::RowNumberExpr;

use crate::scalar::ScalarValue;
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Constant(ConstantExpr),
    Parameter(ParameterExpr),
    Column(ColumnExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Case(CaseExpr),
    Function(FunctionExpr),
    In(InExpr),
    Like(LikeExpr),
    RowValue(RowValueExpr),
    Collate(CollateExpr),
    RowNumber(RowNumberExpr),
    Exists(ExistsExpr),
    Subquery(SubqueryExpr),
}

impl SqlExpr {
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Constant(expr) => expr.datatype.clone(),
            Self::Parameter(expr) => expr.datatype.clone(),
            Self::Column(expr) => expr.datatype(),
            Self::Unary(expr) => match expr.op {
                UnaryOperator::Negate => expr.operand.datatype(),
                UnaryOperator::Not => expr.operand.datatype(),
                UnaryOperator::IsNull | UnaryOperator::IsNotNull => DataType::Boolean,
            },
            Self::Binary(expr) => expr.datatype.clone(),
            Self::Case(expr) => expr.datatype.clone(),
            Self::Function(expr) => expr.datatype.clone(),
            Self::In(_) | Self::Like(_) | Self::RowValue(_) | Self::Exists(_) => DataType::Boolean,
            Self::Collate(expr) => expr.operand.datatype(),
            Self::RowNumber(_) => DataType::Int64,
            Self::Subquery(expr) => expr.datatype.clone(),
        }
    }

    pub const fn is_null_constant(&self) -> bool {
        matches!(
            self,
            Self::Constant(ConstantExpr {
                value: ScalarValue::Null,
                ..
            })
        )
    }

    pub fn try_as_column(&self) -> Option<&ColumnExpr> {
        match self {
            Self::Column(col) => Some(col),
            _ => None,
        }
    }

    /// Visit the direct children of this expression.
    ///
    /// Selects nested in subquery expressions are not children, use
    /// `for_each_subquery` to get at those.
    pub fn for_each_child<F>(&self, func: &mut F) -> Result<()>
    where
        F: FnMut(&SqlExpr) -> Result<()>,
    {
        match self {
            Self::Constant(_) | Self::Parameter(_) | Self::Column(_) => (),
            Self::Unary(expr) => func(&expr.operand)?,
            Self::Binary(expr) => {
                func(&expr.left)?;
                func(&expr.right)?;
            }
            Self::Case(expr) => {
                if let Some(operand) = &expr.operand {
                    func(operand)?;
                }
                for case in &expr.cases {
                    func(&case.when)?;
                    func(&case.then)?;
                }
                if let Some(else_expr) = &expr.else_expr {
                    func(else_expr)?;
                }
            }
            Self::Function(expr) => {
                for arg in &expr.args {
                    func(arg)?;
                }
            }
            Self::In(expr) => {
                func(&expr.needle)?;
                if let InValues::List(values) = &expr.values {
                    for value in values {
                        func(value)?;
                    }
                }
            }
            Self::Like(expr) => {
                func(&expr.input)?;
                func(&expr.pattern)?;
            }
            Self::RowValue(expr) => {
                for col in &expr.columns {
                    func(col)?;
                }
                for value in &expr.values {
                    func(value)?;
                }
            }
            Self::Collate(expr) => func(&expr.operand)?,
            Self::RowNumber(expr) => {
                for part in &expr.partitions {
                    func(part)?;
                }
                for ordering in &expr.orderings {
                    func(&ordering.expr)?;
                }
            }
            Self::Exists(_) | Self::Subquery(_) => (),
        }
        Ok(())
    }

    pub fn for_each_child_mut<F>(&mut self, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut SqlExpr) -> Result<()>,
    {
        match self {
            Self::Constant(_) | Self::Parameter(_) | Self::Column(_) => (),
            Self::Unary(expr) => func(&mut expr.operand)?,
            Self::Binary(expr) => {
                func(&mut expr.left)?;
                func(&mut expr.right)?;
            }
            Self::Case(expr) => {
                if let Some(operand) = &mut expr.operand {
                    func(operand)?;
                }
                for case in &mut expr.cases {
                    func(&mut case.when)?;
                    func(&mut case.then)?;
                }
                if let Some(else_expr) = &mut expr.else_expr {
                    func(else_expr)?;
                }
            }
            Self::Function(expr) => {
                for arg in &mut expr.args {
                    func(arg)?;
                }
            }
            Self::In(expr) => {
                func(&mut expr.needle)?;
                if let InValues::List(values) = &mut expr.values {
                    for value in values {
                        func(value)?;
                    }
                }
            }
            Self::Like(expr) => {
                func(&mut expr.input)?;
                func(&mut expr.pattern)?;
            }
            Self::RowValue(expr) => {
                for col in &mut expr.columns {
                    func(col)?;
                }
                for value in &mut expr.values {
                    func(value)?;
                }
            }
            Self::Collate(expr) => func(&mut expr.operand)?,
            Self::RowNumber(expr) => {
                for part in &mut expr.partitions {
                    func(part)?;
                }
                for ordering in &mut expr.orderings {
                    func(&mut ordering.expr)?;
                }
            }
            Self::Exists(_) | Self::Subquery(_) => (),
        }
        Ok(())
    }

    /// Visit selects nested inside this expression (at any depth), stopping
    /// at the first select on each path.
    pub fn for_each_subquery<F>(&self, func: &mut F) -> Result<()>
    where
        F: FnMut(&SelectExpr) -> Result<()>,
    {
        match self {
            Self::Exists(expr) => func(&expr.subquery),
            Self::Subquery(expr) => func(&expr.subquery),
            other => other.for_each_child(&mut |child| child.for_each_subquery(func)),
        }
    }

    pub fn for_each_subquery_mut<F>(&mut self, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut SelectExpr) -> Result<()>,
    {
        match self {
            Self::Exists(expr) => func(&mut expr.subquery),
            Self::Subquery(expr) => func(&mut expr.subquery),
            other => other.for_each_child_mut(&mut |child| child.for_each_subquery_mut(func)),
        }
    }

    /// Visit every column in this expression, including columns inside
    /// subqueries.
    pub fn for_each_column<F>(&self, func: &mut F) -> Result<()>
    where
        F: FnMut(&ColumnExpr) -> Result<()>,
    {
        match self {
            Self::Column(col) => func(col),
            Self::Exists(_) | Self::Subquery(_) => self.for_each_subquery(&mut |subquery| {
                subquery.walk_selects(&mut |select| {
                    select.for_each_expr(&mut |expr| expr.for_each_column_shallow(func))
                })
            }),
            other => other.for_each_child(&mut |child| child.for_each_column(func)),
        }
    }

    /// Like `for_each_column`, but doesn't enter subqueries.
    fn for_each_column_shallow<F>(&self, func: &mut F) -> Result<()>
    where
        F: FnMut(&ColumnExpr) -> Result<()>,
    {
        match self {
            Self::Column(col) => func(col),
            other => other.for_each_child(&mut |child| child.for_each_column_shallow(func)),
        }
    }
}

impl fmt::Display for SqlExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(expr) => write!(f, "{expr}"),
            Self::Parameter(expr) => write!(f, "{expr}"),
            Self::Column(expr) => write!(f, "{expr}"),
            Self::Unary(expr) => write!(f, "{expr}"),
            Self::Binary(expr) => write!(f, "{expr}"),
            Self::Case(expr) => write!(f, "{expr}"),
            Self::Function(expr) => write!(f, "{expr}"),
            Self::In(expr) => write!(f, "{expr}"),
            Self::Like(expr) => write!(f, "{expr}"),
            Self::RowValue(expr) => write!(f, "{expr}"),
            Self::Collate(expr) => write!(f, "{expr}"),
            Self::RowNumber(expr) => write!(f, "{expr}"),
            Self::Exists(expr) => write!(f, "{expr}"),
            Self::Subquery(expr) => write!(f, "{expr}"),
        }
    }
}

impl From<ConstantExpr> for SqlExpr {
    fn from(value: ConstantExpr) -> Self {
        SqlExpr::Constant(value)
    }
}

impl From<ColumnExpr> for SqlExpr {
    fn from(value: ColumnExpr) -> Self {
        SqlExpr::Column(value)
    }
}

impl From<CaseExpr> for SqlExpr {
    fn from(value: CaseExpr) -> Self {
        SqlExpr::Case(value)
    }
}

impl From<BinaryExpr> for SqlExpr {
    fn from(value: BinaryExpr) -> Self {
        SqlExpr::Binary(value)
    }
}

impl From<UnaryExpr> for SqlExpr {
    fn from(value: UnaryExpr) -> Self {
        SqlExpr::Unary(value)
    }
}

/// Create a constant, typed by its value.
pub fn lit(value: impl Into<ScalarValue>) -> SqlExpr {
    let value = value.into();
    let datatype = value.datatype();
    SqlExpr::Constant(ConstantExpr { value, datatype })
}

/// Create a constant with an explicit type.
pub fn typed_lit(value: impl Into<ScalarValue>, datatype: DataType) -> SqlExpr {
    SqlExpr::Constant(ConstantExpr {
        value: value.into(),
        datatype,
    })
}

/// Null constant of the given type.
pub fn null(datatype: DataType) -> SqlExpr {
    SqlExpr::Constant(ConstantExpr {
        value: ScalarValue::Null,
        datatype,
    })
}

pub fn param(name: impl Into<String>, datatype: DataType) -> SqlExpr {
    SqlExpr::Parameter(ParameterExpr {
        name: name.into(),
        datatype,
        element: None,
    })
}

/// Column reference. Nullability is taken from the type.
pub fn column(table: TableRef, name: impl Into<String>, datatype: DataType) -> SqlExpr {
    let nullable = datatype.is_nullable();
    SqlExpr::Column(ColumnExpr {
        table,
        name: name.into(),
        datatype: datatype.strip_nullable().clone(),
        nullable,
    })
}

fn binary(op: BinaryOperator, left: SqlExpr, right: SqlExpr, datatype: DataType) -> SqlExpr {
    SqlExpr::Binary(BinaryExpr {
        op,
        left: Box::new(left),
        right: Box::new(right),
        datatype,
    })
}

/// Comparison of two expressions.
pub fn compare(op: BinaryOperator, left: SqlExpr, right: SqlExpr) -> SqlExpr {
    binary(op, left, right, DataType::Boolean)
}

pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::Eq, left, right)
}

pub fn not_eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::NotEq, left, right)
}

pub fn lt(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::Lt, left, right)
}

pub fn lt_eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::LtEq, left, right)
}

pub fn gt(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::Gt, left, right)
}

pub fn gt_eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    compare(BinaryOperator::GtEq, left, right)
}

pub fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    binary(BinaryOperator::And, left, right, DataType::Boolean)
}

pub fn or(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    binary(BinaryOperator::Or, left, right, DataType::Boolean)
}

/// AND all expressions together, left-deep.
///
/// Returns None if there are no expressions.
pub fn and_all(exprs: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
    exprs.into_iter().reduce(and)
}

/// Arithmetic, typed by the left operand.
pub fn arith(op: BinaryOperator, left: SqlExpr, right: SqlExpr) -> SqlExpr {
    let datatype = left.datatype();
    binary(op, left, right, datatype)
}

pub fn add(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    arith(BinaryOperator::Add, left, right)
}

pub fn bitand(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    arith(BinaryOperator::BitwiseAnd, left, right)
}

pub fn concat(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    binary(BinaryOperator::Concat, left, right, DataType::Utf8)
}

fn unary(op: UnaryOperator, operand: SqlExpr) -> SqlExpr {
    SqlExpr::Unary(UnaryExpr {
        op,
        operand: Box::new(operand),
    })
}

pub fn is_null(operand: SqlExpr) -> SqlExpr {
    unary(UnaryOperator::IsNull, operand)
}

pub fn is_not_null(operand: SqlExpr) -> SqlExpr {
    unary(UnaryOperator::IsNotNull, operand)
}

pub fn not(operand: SqlExpr) -> SqlExpr {
    unary(UnaryOperator::Not, operand)
}

pub fn negate(operand: SqlExpr) -> SqlExpr {
    unary(UnaryOperator::Negate, operand)
}

/// Searched CASE expression.
pub fn case(cases: Vec<WhenThen>, else_expr: Option<SqlExpr>, datatype: DataType) -> SqlExpr {
    SqlExpr::Case(CaseExpr {
        operand: None,
        cases,
        else_expr: else_expr.map(Box::new),
        datatype,
    })
}

pub fn function(name: impl Into<String>, args: Vec<SqlExpr>, datatype: DataType) -> SqlExpr {
    SqlExpr::Function(FunctionExpr {
        name: name.into(),
        args,
        datatype,
        is_aggregate: false,
    })
}

pub fn aggregate(name: impl Into<String>, args: Vec<SqlExpr>, datatype: DataType) -> SqlExpr {
    SqlExpr::Function(FunctionExpr {
        name: name.into(),
        args,
        datatype,
        is_aggregate: true,
    })
}

pub fn like(input: SqlExpr, pattern: SqlExpr, escape: Option<char>) -> SqlExpr {
    SqlExpr::Like(LikeExpr {
        input: Box::new(input),
        pattern: Box::new(pattern),
        escape,
    })
}

pub fn in_list(needle: SqlExpr, values: Vec<SqlExpr>) -> SqlExpr {
    SqlExpr::In(InExpr {
        needle: Box::new(needle),
        values: InValues::List(values),
        negated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::column_expr::ScopeId;
    use super::*;

    #[test]
    fn for_each_child_visits_case_in_order() {
        let t = TableRef::new(ScopeId(0), 0);
        let expr = case(
            vec![WhenThen::new(eq(column(t, "a", DataType::Int32), lit(1)), lit("one"))],
            Some(lit("other")),
            DataType::Utf8,
        );

        let mut seen = Vec::new();
        expr.for_each_child(&mut |child| {
            seen.push(child.to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(vec!["(#0.0.a = 1)", "'one'", "'other'"], seen);
    }

    #[test]
    fn for_each_column_enters_subqueries() {
        let outer = TableRef::new(ScopeId(0), 0);
        let mut sub = SelectExpr::new(ScopeId(1));
        let inner = sub.add_table(
            "o",
            select_expr::TableSource::Base {
                schema: None,
                name: "orders".to_string(),
            },
            select_expr::JoinType::From,
        );
        sub.predicate = Some(eq(
            column(inner, "customer_id", DataType::Int32),
            column(outer, "id", DataType::Int32),
        ));

        let expr = SqlExpr::Exists(ExistsExpr {
            subquery: Box::new(sub),
            negated: false,
        });

        let mut names = Vec::new();
        expr.for_each_column(&mut |col| {
            names.push(col.name.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(vec!["customer_id", "id"], names);
    }

    #[test]
    fn column_nullability_from_type() {
        let t = TableRef::new(ScopeId(0), 0);
        let col = column(t, "a", DataType::Int32.nullable());
        assert_eq!(DataType::Int32.nullable(), col.datatype());
    }

    #[test]
    fn and_all_empty() {
        assert_eq!(None, and_all(Vec::new()));
    }
}
