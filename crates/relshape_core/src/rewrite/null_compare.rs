use relshape_error::Result;

use super::ExpressionRewriteRule;
use crate::expr::binary_expr::{BinaryExpr, BinaryOperator};
use crate::expr::unary_expr::{UnaryExpr, UnaryOperator};
use crate::expr::{SqlExpr, is_not_null, is_null, lit};

/// Rewrite comparisons against literal nulls into null tests.
///
/// 'x = NULL' => 'x IS NULL'
/// 'x <> NULL' => 'x IS NOT NULL'
/// 'NULL = NULL' => 'true'
/// 'NOT (x IS NULL)' => 'x IS NOT NULL'
#[derive(Debug)]
pub struct NullCompareRewrite;

impl ExpressionRewriteRule for NullCompareRewrite {
    fn rewrite(mut expression: SqlExpr) -> Result<SqlExpr> {
        fn inner(expression: &mut SqlExpr) -> Result<()> {
            expression.for_each_child_mut(&mut inner)?;

            let replacement = match expression {
                SqlExpr::Binary(BinaryExpr {
                    op: op @ (BinaryOperator::Eq | BinaryOperator::NotEq),
                    left,
                    right,
                    ..
                }) => {
                    let is_eq = *op == BinaryOperator::Eq;
                    match (left.is_null_constant(), right.is_null_constant()) {
                        (true, true) => Some(lit(is_eq)),
                        (false, true) => Some(null_test(is_eq, take(left))),
                        (true, false) => Some(null_test(is_eq, take(right))),
                        (false, false) => None,
                    }
                }
                SqlExpr::Unary(UnaryExpr {
                    op: UnaryOperator::Not,
                    operand,
                }) => match operand.as_mut() {
                    SqlExpr::Unary(UnaryExpr {
                        op: UnaryOperator::IsNull,
                        operand,
                    }) => Some(is_not_null(take(operand))),
                    SqlExpr::Unary(UnaryExpr {
                        op: UnaryOperator::IsNotNull,
                        operand,
                    }) => Some(is_null(take(operand))),
                    _ => None,
                },
                _ => None,
            };

            if let Some(replacement) = replacement {
                *expression = replacement;
            }

            Ok(())
        }

        inner(&mut expression)?;

        Ok(expression)
    }
}

fn null_test(is_eq: bool, operand: SqlExpr) -> SqlExpr {
    if is_eq {
        is_null(operand)
    } else {
        is_not_null(operand)
    }
}

fn take(expr: &mut Box<SqlExpr>) -> SqlExpr {
    std::mem::replace(expr.as_mut(), lit(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::{ScopeId, TableRef};
    use crate::expr::{and, column, eq, not, not_eq, null, or};
    use crate::types::DataType;

    fn col(name: &str) -> SqlExpr {
        column(TableRef::new(ScopeId(0), 0), name, DataType::Int32.nullable())
    }

    #[test]
    fn eq_null_right() {
        let expr = eq(col("a"), null(DataType::Int32));
        let got = NullCompareRewrite::rewrite(expr).unwrap();
        assert_eq!(is_null(col("a")), got);
    }

    #[test]
    fn not_eq_null_left() {
        let expr = not_eq(null(DataType::Int32), col("a"));
        let got = NullCompareRewrite::rewrite(expr).unwrap();
        assert_eq!(is_not_null(col("a")), got);
    }

    #[test]
    fn null_eq_null() {
        let expr = or(
            eq(null(DataType::Null), null(DataType::Null)),
            not_eq(null(DataType::Null), null(DataType::Null)),
        );
        let got = NullCompareRewrite::rewrite(expr).unwrap();
        assert_eq!(or(lit(true), lit(false)), got);
    }

    #[test]
    fn not_is_null_folds() {
        // 'NOT (a = NULL)' => 'a IS NOT NULL'
        let expr = not(eq(col("a"), null(DataType::Int32)));
        let got = NullCompareRewrite::rewrite(expr).unwrap();
        assert_eq!(is_not_null(col("a")), got);
    }

    #[test]
    fn untouched_without_nulls() {
        let expr = and(eq(col("a"), lit(1)), not_eq(col("b"), col("a")));
        let got = NullCompareRewrite::rewrite(expr.clone()).unwrap();
        assert_eq!(expr, got);
    }

    #[test]
    fn idempotent() {
        let expr = and(
            not(eq(col("a"), null(DataType::Int32))),
            or(not_eq(null(DataType::Int32), col("b")), eq(col("c"), lit(3))),
        );
        let once = NullCompareRewrite::rewrite(expr).unwrap();
        let twice = NullCompareRewrite::rewrite(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
