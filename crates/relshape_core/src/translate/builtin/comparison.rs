use crate::expr::case_expr::WhenThen;
use crate::expr::{SqlExpr, case, eq, gt, lit, lt};
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, methods, types};
use crate::types::DataType;

/// Three way comparison returning an integer.
///
/// Handles static `Compare(a, b)` and instance `a.CompareTo(b)`:
///
/// ```text
/// CASE WHEN a = b THEN 0 WHEN a > b THEN 1 WHEN a < b THEN -1 END
/// ```
///
/// There's no ELSE, comparing with null yields null. Operands that can't be
/// compared aren't translated.
#[derive(Debug, Clone, Copy)]
pub struct CompareTranslator;

impl MethodCallTranslator for CompareTranslator {
    fn translate(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        let (left, right) = match (receiver, args) {
            (None, [left, right]) if method.is_static && method.name == "Compare" => (left, right),
            (Some(left), [right]) if method.same_method(&methods::COMPARE_TO) => (left, right),
            _ => return None,
        };

        if !left.datatype().unifies_with(&right.datatype()) {
            return None;
        }

        Some(case(
            vec![
                WhenThen::new(eq(left.clone(), right.clone()), lit(0)),
                WhenThen::new(gt(left.clone(), right.clone()), lit(1)),
                WhenThen::new(lt(left.clone(), right.clone()), lit(-1)),
            ],
            None,
            DataType::Int32,
        ))
    }
}

/// `a.Equals(b)` and `Equals(a, b)`.
///
/// Operands whose types can never hold equal values translate to a constant
/// false.
#[derive(Debug, Clone, Copy)]
pub struct EqualsTranslator;

impl MethodCallTranslator for EqualsTranslator {
    fn translate(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        let (left, right) = match (receiver, args) {
            (Some(left), [right]) if method.same_method(&methods::EQUALS) => (left, right),
            (None, [left, right])
                if *method == methods::STATIC_EQUALS
                    || (method.declaring_type == types::OBJECT && method.name == "Equals") =>
            {
                (left, right)
            }
            _ => return None,
        };

        if left.datatype().unifies_with(&right.datatype()) {
            Some(eq(left.clone(), right.clone()))
        } else {
            Some(lit(false))
        }
    }
}
