use crate::expr::{SqlExpr, function};
use crate::translate::MethodCallTranslator;
use crate::translate::descriptor::{OperationDescriptor, types};

/// Static math functions over numbers.
#[derive(Debug, Clone, Copy)]
pub struct MathTranslator;

impl MethodCallTranslator for MathTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if method.declaring_type != types::MATH || !method.is_static {
            return None;
        }

        let [arg] = args else {
            return None;
        };
        if !arg.datatype().is_numeric() {
            return None;
        }

        let name = match method.name {
            "Abs" => "ABS",
            "Ceiling" => "CEILING",
            "Floor" => "FLOOR",
            "Round" => "ROUND",
            _ => return None,
        };

        Some(function(name, vec![arg.clone()], arg.datatype()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lit;
    use crate::translate::descriptor::methods;
    use crate::types::DataType;

    #[test]
    fn abs() {
        let got = MathTranslator
            .translate(None, &methods::MATH_ABS, &[lit(-4.5)])
            .unwrap();
        assert_eq!(function("ABS", vec![lit(-4.5)], DataType::Float64), got);
    }

    #[test]
    fn non_numeric_declines() {
        let got = MathTranslator.translate(None, &methods::MATH_FLOOR, &[lit("a")]);
        assert_eq!(None, got);
    }
}
