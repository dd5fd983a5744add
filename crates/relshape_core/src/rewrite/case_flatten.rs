use relshape_error::Result;

use super::ExpressionRewriteRule;
use crate::expr::SqlExpr;
use crate::expr::case_expr::CaseExpr;

/// Merge searched CASE expressions nested in the ELSE of another searched
/// CASE.
///
/// 'CASE WHEN a THEN x ELSE CASE WHEN b THEN y ELSE z END END'
///   => 'CASE WHEN a THEN x WHEN b THEN y ELSE z END'
///
/// Simple CASE expressions (with an operand) are left alone.
#[derive(Debug)]
pub struct CaseFlattenRewrite;

impl ExpressionRewriteRule for CaseFlattenRewrite {
    fn rewrite(mut expression: SqlExpr) -> Result<SqlExpr> {
        fn inner(expression: &mut SqlExpr) -> Result<()> {
            // Children first, a nested ELSE case is already flat.
            expression.for_each_child_mut(&mut inner)?;

            if let SqlExpr::Case(case) = expression {
                if case.is_searched() {
                    if let Some(else_expr) = case.else_expr.take() {
                        match *else_expr {
                            SqlExpr::Case(CaseExpr {
                                operand: None,
                                cases,
                                else_expr,
                                ..
                            }) => {
                                case.cases.extend(cases);
                                case.else_expr = else_expr;
                            }
                            other => case.else_expr = Some(Box::new(other)),
                        }
                    }
                }
            }

            Ok(())
        }

        inner(&mut expression)?;

        Ok(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::case_expr::WhenThen;
    use crate::expr::column_expr::{ScopeId, TableRef};
    use crate::expr::{case, column, eq, lit};
    use crate::types::DataType;

    fn col(name: &str) -> SqlExpr {
        column(TableRef::new(ScopeId(0), 0), name, DataType::Int32)
    }

    fn when(v: i32, then: &str) -> WhenThen {
        WhenThen::new(eq(col("a"), lit(v)), lit(then))
    }

    #[test]
    fn flatten_three_levels() {
        let expr = case(
            vec![when(1, "one")],
            Some(case(
                vec![when(2, "two"), when(3, "three")],
                Some(case(vec![when(4, "four")], Some(lit("other")), DataType::Utf8)),
                DataType::Utf8,
            )),
            DataType::Utf8,
        );

        let expected = case(
            vec![when(1, "one"), when(2, "two"), when(3, "three"), when(4, "four")],
            Some(lit("other")),
            DataType::Utf8,
        );

        let got = CaseFlattenRewrite::rewrite(expr).unwrap();
        assert_eq!(expected, got);
    }

    #[test]
    fn innermost_without_else() {
        let expr = case(
            vec![when(1, "one")],
            Some(case(vec![when(2, "two")], None, DataType::Utf8)),
            DataType::Utf8,
        );
        let expected = case(vec![when(1, "one"), when(2, "two")], None, DataType::Utf8);

        let got = CaseFlattenRewrite::rewrite(expr).unwrap();
        assert_eq!(expected, got);
    }

    #[test]
    fn simple_case_untouched() {
        let nested = SqlExpr::Case(CaseExpr {
            operand: Some(Box::new(col("b"))),
            cases: vec![WhenThen::new(lit(1), lit("x"))],
            else_expr: None,
            datatype: DataType::Utf8,
        });
        let expr = case(vec![when(1, "one")], Some(nested), DataType::Utf8);

        let got = CaseFlattenRewrite::rewrite(expr.clone()).unwrap();
        assert_eq!(expr, got);
    }
}
