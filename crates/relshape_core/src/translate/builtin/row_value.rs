use crate::expr::SqlExpr;
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::row_value_expr::RowValueExpr;
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, types};

/// Row value comparisons, `(a, b) > (c, d)`.
///
/// Arguments are the two tuples flattened, the first half being the left
/// tuple and the second half the right.
#[derive(Debug, Clone, Copy)]
pub struct RowValueComparisonTranslator;

impl MethodCallTranslator for RowValueComparisonTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if method.declaring_type != types::DB_FUNCTIONS || !method.is_static {
            return None;
        }

        let op = match method.name {
            "LessThan" => BinaryOperator::Lt,
            "LessThanOrEqual" => BinaryOperator::LtEq,
            "GreaterThan" => BinaryOperator::Gt,
            "GreaterThanOrEqual" => BinaryOperator::GtEq,
            _ => return None,
        };

        if args.len() < 2 || args.len() % 2 != 0 {
            return None;
        }

        let (columns, values) = args.split_at(args.len() / 2);
        Some(SqlExpr::RowValue(RowValueExpr {
            op,
            columns: columns.to_vec(),
            values: values.to_vec(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::{ScopeId, TableRef};
    use crate::expr::{column, lit};
    use crate::translate::descriptor::methods;
    use crate::types::DataType;

    #[test]
    fn greater_than_two_columns() {
        let t = TableRef::new(ScopeId(0), 0);
        let a = column(t, "a", DataType::Int32);
        let b = column(t, "b", DataType::Utf8);

        let got = RowValueComparisonTranslator
            .translate(
                None,
                &methods::ROW_GREATER_THAN,
                &[a.clone(), b.clone(), lit(1), lit("x")],
            )
            .unwrap();

        assert_eq!(
            SqlExpr::RowValue(RowValueExpr {
                op: BinaryOperator::Gt,
                columns: vec![a, b],
                values: vec![lit(1), lit("x")],
            }),
            got
        );
    }

    #[test]
    fn uneven_declines() {
        let got = RowValueComparisonTranslator.translate(
            None,
            &methods::ROW_LESS_THAN,
            &[lit(1), lit(2), lit(3)],
        );
        assert_eq!(None, got);
    }
}
