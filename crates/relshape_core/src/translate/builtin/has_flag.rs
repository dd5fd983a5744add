use crate::expr::{SqlExpr, bitand, eq};
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, methods};

/// `x.HasFlag(f)` => `(x & f) = f`
///
/// Only when both sides share the same underlying integral type.
#[derive(Debug, Clone, Copy)]
pub struct HasFlagTranslator;

impl MethodCallTranslator for HasFlagTranslator {
    fn translate(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if *method != methods::HAS_FLAG {
            return None;
        }
        let instance = receiver?;
        let [flag] = args else {
            return None;
        };

        let instance_type = instance.datatype();
        let flag_type = flag.datatype();
        if instance_type.underlying() != flag_type.underlying() {
            return None;
        }

        Some(eq(bitand(instance.clone(), flag.clone()), flag.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::{ScopeId, TableRef};
    use crate::expr::{column, typed_lit};
    use crate::types::{DataType, EnumType};

    fn flags() -> DataType {
        DataType::Enum(EnumType {
            name: "Permissions".to_string(),
            underlying: Box::new(DataType::Int32),
        })
    }

    #[test]
    fn has_flag_same_type() {
        let col = column(TableRef::new(ScopeId(0), 0), "perms", flags().nullable());
        let flag = typed_lit(4, flags());

        let got = HasFlagTranslator
            .translate(Some(&col), &methods::HAS_FLAG, &[flag.clone()])
            .unwrap();
        assert_eq!(eq(bitand(col, flag.clone()), flag), got);
    }

    #[test]
    fn has_flag_mismatched_declines() {
        let col = column(TableRef::new(ScopeId(0), 0), "perms", flags());
        let flag = typed_lit(4_i64, DataType::Int64);

        let got = HasFlagTranslator.translate(Some(&col), &methods::HAS_FLAG, &[flag]);
        assert_eq!(None, got);
    }
}
