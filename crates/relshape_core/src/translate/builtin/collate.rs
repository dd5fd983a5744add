use crate::expr::SqlExpr;
use crate::expr::collate_expr::CollateExpr;
use crate::scalar::ScalarValue;
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, methods};

/// `Collate(x, "name")`. The collation must be a constant.
#[derive(Debug, Clone, Copy)]
pub struct CollateTranslator;

impl MethodCallTranslator for CollateTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if *method != methods::COLLATE {
            return None;
        }

        match args {
            [operand, SqlExpr::Constant(c)] => match &c.value {
                ScalarValue::Utf8(collation) => Some(SqlExpr::Collate(CollateExpr {
                    operand: Box::new(operand.clone()),
                    collation: collation.clone(),
                })),
                _ => None,
            },
            _ => None,
        }
    }
}
