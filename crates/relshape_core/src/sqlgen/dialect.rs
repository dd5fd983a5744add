use std::fmt::{self, Debug, Write as _};

use relshape_error::{DbError, Result};

use crate::scalar::ScalarValue;

/// Database specific parts of command text.
pub trait Dialect: Debug + Sync + Send {
    /// Write a quoted identifier.
    fn write_identifier(&self, ident: &str, buf: &mut String) -> fmt::Result {
        buf.push('"');
        for c in ident.chars() {
            if c == '"' {
                buf.push('"');
            }
            buf.push(c);
        }
        buf.push('"');
        Ok(())
    }

    /// Write the placeholder for the parameter at `idx` (zero based) in the
    /// command's parameter list.
    fn write_placeholder(&self, idx: usize, buf: &mut String) -> fmt::Result {
        write!(buf, "${}", idx + 1)
    }

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Write a literal value.
    fn write_literal(&self, value: &ScalarValue, buf: &mut String) -> Result<()> {
        match value {
            ScalarValue::Null => buf.push_str("NULL"),
            ScalarValue::Boolean(true) => buf.push_str("TRUE"),
            ScalarValue::Boolean(false) => buf.push_str("FALSE"),
            ScalarValue::Int8(v) => write!(buf, "{v}")?,
            ScalarValue::Int16(v) => write!(buf, "{v}")?,
            ScalarValue::Int32(v) => write!(buf, "{v}")?,
            ScalarValue::Int64(v) => write!(buf, "{v}")?,
            ScalarValue::Float64(v) => {
                if !v.is_finite() {
                    return Err(DbError::new("Cannot write non-finite float literal")
                        .with_field("value", *v));
                }
                write!(buf, "{v:?}")?
            }
            ScalarValue::Utf8(s) => {
                buf.push('\'');
                for c in s.chars() {
                    if c == '\'' {
                        buf.push('\'');
                    }
                    buf.push(c);
                }
                buf.push('\'');
            }
            ScalarValue::Binary(bytes) => {
                buf.push_str("X'");
                for b in bytes {
                    write!(buf, "{b:02X}")?;
                }
                buf.push('\'');
            }
            ScalarValue::List(_) => {
                return Err(DbError::internal("List values cannot be written as a literal"));
            }
        }
        Ok(())
    }

    /// Write the clause limiting rows, after ORDER BY.
    ///
    /// Arguments are already rendered expressions.
    fn write_limit_offset(&self, limit: Option<&str>, offset: Option<&str>, buf: &mut String) -> fmt::Result {
        if let Some(offset) = offset {
            write!(buf, " OFFSET {offset} ROWS")?;
        }
        if let Some(limit) = limit {
            let word = if offset.is_some() { "NEXT" } else { "FIRST" };
            write!(buf, " FETCH {word} {limit} ROWS ONLY")?;
        }
        Ok(())
    }
}

/// Standard SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(value: ScalarValue) -> String {
        let mut buf = String::new();
        AnsiDialect.write_literal(&value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn escape_quotes() {
        assert_eq!("'it''s'", literal("it's".into()));

        let mut buf = String::new();
        AnsiDialect.write_identifier("a\"b", &mut buf).unwrap();
        assert_eq!("\"a\"\"b\"", buf);
    }

    #[test]
    fn binary_literal() {
        assert_eq!("X'0AFF'", literal(vec![0x0a, 0xff].into()));
    }

    #[test]
    fn float_literal_keeps_decimal_point() {
        assert_eq!("2.0", literal(2.0.into()));
        AnsiDialect
            .write_literal(&f64::NAN.into(), &mut String::new())
            .unwrap_err();
    }

    #[test]
    fn limit_offset() {
        let mut buf = String::new();
        AnsiDialect
            .write_limit_offset(Some("5"), Some("10"), &mut buf)
            .unwrap();
        assert_eq!(" OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY", buf);

        let mut buf = String::new();
        AnsiDialect.write_limit_offset(Some("5"), None, &mut buf).unwrap();
        assert_eq!(" FETCH FIRST 5 ROWS ONLY", buf);
    }
}
