use crate::expr::{SqlExpr, concat, eq, function, gt, is_null, like, lit, negate, or};
use crate::scalar::ScalarValue;
use crate::translate::descriptor::{MemberDescriptor, OperationDescriptor, methods, types};
use crate::translate::{MemberTranslator, MethodCallTranslator};
use crate::types::DataType;

const LIKE_ESCAPE: char = '\\';

/// `IsNullOrEmpty(x)` => `x IS NULL OR x = ''`
#[derive(Debug, Clone, Copy)]
pub struct IsNullOrEmptyTranslator;

impl MethodCallTranslator for IsNullOrEmptyTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if *method != methods::STRING_IS_NULL_OR_EMPTY {
            return None;
        }

        let [arg] = args else {
            return None;
        };

        Some(or(is_null(arg.clone()), eq(arg.clone(), lit(""))))
    }
}

/// String concatenation of any number of strings.
///
/// Produces a right associative chain, `a || (b || c)`.
#[derive(Debug, Clone, Copy)]
pub struct StringConcatTranslator;

impl MethodCallTranslator for StringConcatTranslator {
    fn translate(
        &self,
        _receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if !(method.declaring_type == types::STRING && method.name == "Concat" && method.is_static)
        {
            return None;
        }

        if args.len() < 2 || !args.iter().all(|arg| arg.datatype().is_utf8()) {
            return None;
        }

        args.iter()
            .rev()
            .cloned()
            .reduce(|acc, arg| concat(arg, acc))
    }
}

/// Instance methods on strings.
#[derive(Debug, Clone, Copy)]
pub struct StringMethodTranslator;

impl MethodCallTranslator for StringMethodTranslator {
    fn translate(
        &self,
        receiver: Option<&SqlExpr>,
        method: &OperationDescriptor,
        args: &[SqlExpr],
    ) -> Option<SqlExpr> {
        if method.declaring_type != types::STRING || method.is_static {
            return None;
        }
        let receiver = receiver?;
        if !receiver.datatype().is_utf8() {
            return None;
        }

        let string_type = receiver.datatype();
        match (method.name, args) {
            ("ToUpper", []) => Some(function("UPPER", vec![receiver.clone()], string_type)),
            ("ToLower", []) => Some(function("LOWER", vec![receiver.clone()], string_type)),
            ("Trim", []) => Some(function("TRIM", vec![receiver.clone()], string_type)),
            ("Contains", [pattern]) => Some(contains(receiver, pattern)),
            ("StartsWith", [pattern]) => Some(starts_with(receiver, pattern)),
            ("EndsWith", [pattern]) => Some(ends_with(receiver, pattern)),
            _ => None,
        }
    }
}

fn constant_str(expr: &SqlExpr) -> Option<&str> {
    match expr {
        SqlExpr::Constant(c) => match &c.value {
            ScalarValue::Utf8(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Escape LIKE wildcards in a literal string.
pub fn escape_like_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn like_pattern(input: &SqlExpr, pattern: String) -> SqlExpr {
    like(input.clone(), lit(pattern), Some(LIKE_ESCAPE))
}

fn instr(input: &SqlExpr, pattern: &SqlExpr) -> SqlExpr {
    function(
        "INSTR",
        vec![input.clone(), pattern.clone()],
        DataType::Int32,
    )
}

fn length(input: &SqlExpr) -> SqlExpr {
    function("LENGTH", vec![input.clone()], DataType::Int32)
}

fn contains(input: &SqlExpr, pattern: &SqlExpr) -> SqlExpr {
    match constant_str(pattern) {
        Some(s) => like_pattern(input, format!("%{}%", escape_like_pattern(s))),
        None => gt(instr(input, pattern), lit(0)),
    }
}

fn starts_with(input: &SqlExpr, pattern: &SqlExpr) -> SqlExpr {
    match constant_str(pattern) {
        Some(s) => like_pattern(input, format!("{}%", escape_like_pattern(s))),
        None => eq(instr(input, pattern), lit(1)),
    }
}

fn ends_with(input: &SqlExpr, pattern: &SqlExpr) -> SqlExpr {
    match constant_str(pattern) {
        Some(s) => like_pattern(input, format!("%{}", escape_like_pattern(s))),
        None => {
            // SUBSTR(x, -LENGTH(p)) = p
            let suffix = function(
                "SUBSTR",
                vec![input.clone(), negate(length(pattern))],
                input.datatype(),
            );
            or(eq(length(pattern), lit(0)), eq(suffix, pattern.clone()))
        }
    }
}

/// `Length` member on strings.
#[derive(Debug, Clone, Copy)]
pub struct StringLengthTranslator;

impl MemberTranslator for StringLengthTranslator {
    fn translate(&self, instance: &SqlExpr, member: &MemberDescriptor) -> Option<SqlExpr> {
        if member.declaring_type != types::STRING || member.name != "Length" {
            return None;
        }
        Some(length(instance))
    }
}
