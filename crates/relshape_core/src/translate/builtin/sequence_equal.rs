use crate::expr::{SqlExpr, eq};
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, methods};

/// `SequenceEqual` over two byte sequences is plain equality.
#[derive(Debug, Clone, Copy)]
pub struct ByteArraySequenceEqualTranslator;

impl MethodCallTranslator for ByteArraySequenceEqualTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if method.generic_definition != Some(methods::SEQUENCE_EQUAL_DEFINITION) {
            return None;
        }

        match args {
            [left, right] if left.datatype().is_binary() => Some(eq(left.clone(), right.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::column_expr::{ScopeId, TableRef};
    use crate::expr::{column, param};
    use crate::types::DataType;

    #[test]
    fn bytes_to_equality() {
        let col = column(TableRef::new(ScopeId(0), 0), "hash", DataType::Binary);
        let p = param("h", DataType::Binary);

        let got = ByteArraySequenceEqualTranslator
            .translate(None, &methods::BYTES_SEQUENCE_EQUAL, &[col.clone(), p.clone()])
            .unwrap();
        assert_eq!(eq(col, p), got);
    }

    #[test]
    fn declines_non_bytes() {
        let col = column(TableRef::new(ScopeId(0), 0), "names", DataType::Utf8);
        let got = ByteArraySequenceEqualTranslator.translate(
            None,
            &methods::BYTES_SEQUENCE_EQUAL,
            &[col.clone(), col],
        );
        assert_eq!(None, got);
    }
}
