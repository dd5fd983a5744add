//! Command text generation.

pub mod dialect;

use std::fmt::{self, Write as _};

use dialect::Dialect;
use hashbrown::HashMap;
use relshape_error::{DbError, OptionExt, Result};

use crate::expr::SqlExpr;
use crate::expr::binary_expr::BinaryOperator;
use crate::expr::column_expr::{ScopeId, TableRef};
use crate::expr::in_expr::InValues;
use crate::expr::select_expr::{JoinType, OrderingExpr, SelectExpr, TableSource};
use crate::expr::unary_expr::UnaryOperator;
use crate::rewrite::parameters::ParameterValues;
use crate::scalar::ScalarValue;

/// Reference to a parameter value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterPlaceholder {
    pub name: String,
    /// Element of an array parameter.
    pub element: Option<usize>,
}

/// Command text along with the parameters its placeholders bind to, in
/// placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub sql: String,
    pub parameters: Vec<ParameterPlaceholder>,
}

impl CommandTemplate {
    /// Get the values to bind to the placeholders.
    pub fn bind(&self, values: &ParameterValues) -> Result<Vec<ScalarValue>> {
        self.parameters
            .iter()
            .map(|placeholder| {
                let value = values
                    .get(&placeholder.name)
                    .required("parameter value")
                    .map_err(|e| e.with_field("parameter", placeholder.name.clone()))?;
                match placeholder.element {
                    None => Ok(value.clone()),
                    Some(idx) => value.try_as_list()?.get(idx).cloned().ok_or_else(|| {
                        DbError::new("Array parameter has fewer elements than the command expects")
                            .with_field("parameter", placeholder.name.clone())
                            .with_field("element", idx)
                    }),
                }
            })
            .collect()
    }
}

/// A command ready to send to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub sql: String,
    pub values: Vec<ScalarValue>,
}

/// Generate the command for a statement.
pub fn generate(dialect: &dyn Dialect, select: &SelectExpr) -> Result<CommandTemplate> {
    let mut aliases = HashMap::new();
    select.walk_selects(&mut |select| {
        let names = select
            .tables
            .iter()
            .enumerate()
            .map(|(idx, table)| table.alias.clone().unwrap_or_else(|| format!("t{idx}")))
            .collect();
        aliases.insert(select.scope, names);
        Ok(())
    })?;

    let mut generator = SqlGenerator {
        dialect,
        aliases,
        parameters: Vec::new(),
        buf: String::new(),
    };
    generator.write_select(select)?;

    Ok(CommandTemplate {
        sql: generator.buf,
        parameters: generator.parameters,
    })
}

#[derive(Debug)]
struct SqlGenerator<'a> {
    dialect: &'a dyn Dialect,
    /// Table aliases for every select in the statement, indexed by table.
    aliases: HashMap<ScopeId, Vec<String>>,
    parameters: Vec<ParameterPlaceholder>,
    buf: String,
}

impl SqlGenerator<'_> {
    fn write_select(&mut self, select: &SelectExpr) -> Result<()> {
        self.buf.push_str("SELECT ");
        if select.distinct {
            self.buf.push_str("DISTINCT ");
        }

        if select.projections.is_empty() {
            self.buf.push('1');
        }
        for (idx, proj) in select.projections.iter().enumerate() {
            if idx > 0 {
                self.buf.push_str(", ");
            }
            self.write_expr(&proj.expr)?;
            self.buf.push_str(" AS ");
            self.dialect.write_identifier(&proj.alias, &mut self.buf)?;
        }

        for (idx, table) in select.tables.iter().enumerate() {
            self.buf.push_str(match &table.join {
                JoinType::From => " FROM ",
                JoinType::Cross => " CROSS JOIN ",
                JoinType::Inner(_) => " INNER JOIN ",
                JoinType::LeftOuter(_) => " LEFT JOIN ",
            });
            match &table.source {
                TableSource::Base { schema, name } => {
                    if let Some(schema) = schema {
                        self.dialect.write_identifier(schema, &mut self.buf)?;
                        self.buf.push('.');
                    }
                    self.dialect.write_identifier(name, &mut self.buf)?;
                }
                TableSource::Derived(inner) => {
                    self.buf.push('(');
                    self.write_select(inner)?;
                    self.buf.push(')');
                }
            }
            self.buf.push_str(" AS ");
            let alias = self.table_alias(select.table_ref(idx))?.to_string();
            self.dialect.write_identifier(&alias, &mut self.buf)?;

            if let Some(cond) = table.join.condition() {
                self.buf.push_str(" ON ");
                self.write_expr(cond)?;
            }
        }

        if let Some(pred) = &select.predicate {
            self.buf.push_str(" WHERE ");
            self.write_expr(pred)?;
        }

        if !select.group_by.is_empty() {
            self.buf.push_str(" GROUP BY ");
            self.write_list(&select.group_by)?;
        }

        if let Some(having) = &select.having {
            self.buf.push_str(" HAVING ");
            self.write_expr(having)?;
        }

        if !select.orderings.is_empty() {
            self.buf.push_str(" ORDER BY ");
            self.write_orderings(&select.orderings)?;
        }

        let limit = select.limit.as_ref().map(|e| self.render(e)).transpose()?;
        let offset = select.offset.as_ref().map(|e| self.render(e)).transpose()?;
        self.dialect
            .write_limit_offset(limit.as_deref(), offset.as_deref(), &mut self.buf)?;

        Ok(())
    }

    /// Render an expression on its own, keeping placeholder numbering.
    fn render(&mut self, expr: &SqlExpr) -> Result<String> {
        let outer = std::mem::take(&mut self.buf);
        let result = self.write_expr(expr);
        let rendered = std::mem::replace(&mut self.buf, outer);
        result.map(|_| rendered)
    }

    fn table_alias(&self, table: TableRef) -> Result<&str> {
        self.aliases
            .get(&table.scope)
            .and_then(|names| names.get(table.table_idx))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                DbError::internal("Column references a table outside the statement")
                    .with_field("table", table.to_string())
            })
    }

    fn write_list(&mut self, exprs: &[SqlExpr]) -> Result<()> {
        for (idx, expr) in exprs.iter().enumerate() {
            if idx > 0 {
                self.buf.push_str(", ");
            }
            self.write_expr(expr)?;
        }
        Ok(())
    }

    fn write_orderings(&mut self, orderings: &[OrderingExpr]) -> Result<()> {
        for (idx, ordering) in orderings.iter().enumerate() {
            if idx > 0 {
                self.buf.push_str(", ");
            }
            self.write_expr(&ordering.expr)?;
            if !ordering.ascending {
                self.buf.push_str(" DESC");
            }
        }
        Ok(())
    }

    fn write_parameter(&mut self, name: &str, element: Option<usize>) -> fmt::Result {
        let idx = match self
            .parameters
            .iter()
            .position(|p| p.name == name && p.element == element)
        {
            Some(idx) => idx,
            None => {
                self.parameters.push(ParameterPlaceholder {
                    name: name.to_string(),
                    element,
                });
                self.parameters.len() - 1
            }
        };
        self.dialect.write_placeholder(idx, &mut self.buf)
    }

    fn write_expr(&mut self, expr: &SqlExpr) -> Result<()> {
        match expr {
            SqlExpr::Constant(constant) => self.dialect.write_literal(&constant.value, &mut self.buf)?,
            SqlExpr::Parameter(param) => self.write_parameter(&param.name, param.element)?,
            SqlExpr::Column(col) => {
                let alias = self.table_alias(col.table)?.to_string();
                self.dialect.write_identifier(&alias, &mut self.buf)?;
                self.buf.push('.');
                self.dialect.write_identifier(&col.name, &mut self.buf)?;
            }
            SqlExpr::Unary(unary) => match unary.op {
                UnaryOperator::Not => {
                    self.buf.push_str("NOT (");
                    self.write_expr(&unary.operand)?;
                    self.buf.push(')');
                }
                UnaryOperator::Negate => {
                    self.buf.push_str("-(");
                    self.write_expr(&unary.operand)?;
                    self.buf.push(')');
                }
                UnaryOperator::IsNull => {
                    self.write_expr(&unary.operand)?;
                    self.buf.push_str(" IS NULL");
                }
                UnaryOperator::IsNotNull => {
                    self.write_expr(&unary.operand)?;
                    self.buf.push_str(" IS NOT NULL");
                }
            },
            SqlExpr::Binary(binary) => {
                let op = match binary.op {
                    BinaryOperator::Concat => self.dialect.concat_operator(),
                    other => other.as_sql(),
                };
                self.buf.push('(');
                self.write_expr(&binary.left)?;
                write!(self.buf, " {op} ")?;
                self.write_expr(&binary.right)?;
                self.buf.push(')');
            }
            SqlExpr::Case(case) => {
                self.buf.push_str("CASE");
                if let Some(operand) = &case.operand {
                    self.buf.push(' ');
                    self.write_expr(operand)?;
                }
                for when_then in &case.cases {
                    self.buf.push_str(" WHEN ");
                    self.write_expr(&when_then.when)?;
                    self.buf.push_str(" THEN ");
                    self.write_expr(&when_then.then)?;
                }
                if let Some(else_expr) = &case.else_expr {
                    self.buf.push_str(" ELSE ");
                    self.write_expr(else_expr)?;
                }
                self.buf.push_str(" END");
            }
            SqlExpr::Function(func) => {
                self.buf.push_str(&func.name);
                self.buf.push('(');
                if func.args.is_empty() && func.is_aggregate {
                    self.buf.push('*');
                }
                self.write_list(&func.args)?;
                self.buf.push(')');
            }
            SqlExpr::In(in_expr) => {
                let InValues::List(values) = &in_expr.values else {
                    return Err(DbError::internal("Array parameter was not expanded before generation")
                        .with_field("expr", expr.to_string()));
                };
                self.write_expr(&in_expr.needle)?;
                self.buf.push_str(if in_expr.negated { " NOT IN (" } else { " IN (" });
                self.write_list(values)?;
                self.buf.push(')');
            }
            SqlExpr::Like(like) => {
                self.write_expr(&like.input)?;
                self.buf.push_str(" LIKE ");
                self.write_expr(&like.pattern)?;
                if let Some(escape) = like.escape {
                    self.buf.push_str(" ESCAPE ");
                    self.dialect
                        .write_literal(&ScalarValue::Utf8(escape.to_string()), &mut self.buf)?;
                }
            }
            SqlExpr::RowValue(row) => {
                self.buf.push('(');
                self.write_list(&row.columns)?;
                write!(self.buf, ") {} (", row.op.as_sql())?;
                self.write_list(&row.values)?;
                self.buf.push(')');
            }
            SqlExpr::Collate(collate) => {
                self.write_expr(&collate.operand)?;
                write!(self.buf, " COLLATE {}", collate.collation)?;
            }
            SqlExpr::RowNumber(row_number) => {
                self.buf.push_str("ROW_NUMBER() OVER (");
                if !row_number.partitions.is_empty() {
                    self.buf.push_str("PARTITION BY ");
                    self.write_list(&row_number.partitions)?;
                    self.buf.push(' ');
                }
                self.buf.push_str("ORDER BY ");
                if row_number.orderings.is_empty() {
                    self.buf.push_str("(SELECT 1)");
                } else {
                    self.write_orderings(&row_number.orderings)?;
                }
                self.buf.push(')');
            }
            SqlExpr::Exists(exists) => {
                if exists.negated {
                    self.buf.push_str("NOT ");
                }
                self.buf.push_str("EXISTS (");
                self.write_select(&exists.subquery)?;
                self.buf.push(')');
            }
            SqlExpr::Subquery(subquery) => {
                self.buf.push('(');
                self.write_select(&subquery.subquery)?;
                self.buf.push(')');
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::dialect::AnsiDialect;
    use super::*;
    use crate::expr::in_expr::InExpr;
    use crate::expr::literal_expr::ParameterExpr;
    use crate::expr::select_expr::ProjectionExpr;
    use crate::expr::{column, concat, eq, gt, in_list, lit, param};
    use crate::types::DataType;

    fn base(name: &str) -> TableSource {
        TableSource::Base {
            schema: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn simple_select() {
        let mut select = SelectExpr::new(ScopeId(0));
        let c = select.add_table("c", base("customers"), JoinType::From);
        select.add_projection(column(c, "id", DataType::Int32), "id");
        select.add_predicate(gt(column(c, "id", DataType::Int32), param("min", DataType::Int32)));
        select.orderings.push(OrderingExpr {
            expr: column(c, "id", DataType::Int32),
            ascending: false,
        });
        select.limit = Some(lit(10));

        let template = generate(&AnsiDialect, &select).unwrap();
        assert_eq!(
            "SELECT \"c\".\"id\" AS \"id\" FROM \"customers\" AS \"c\" WHERE (\"c\".\"id\" > $1) ORDER BY \"c\".\"id\" DESC FETCH FIRST 10 ROWS ONLY",
            template.sql
        );
        assert_eq!(
            vec![ParameterPlaceholder {
                name: "min".to_string(),
                element: None
            }],
            template.parameters
        );
    }

    #[test]
    fn placeholders_reused() {
        let mut select = SelectExpr::new(ScopeId(0));
        let c = select.add_table("c", base("customers"), JoinType::From);
        select.add_predicate(eq(column(c, "a", DataType::Int32), param("p", DataType::Int32)));
        select.add_predicate(eq(column(c, "b", DataType::Int32), param("p", DataType::Int32)));

        let template = generate(&AnsiDialect, &select).unwrap();
        assert_eq!(1, template.parameters.len());
        assert!(template.sql.starts_with("SELECT 1 FROM"));
        assert_eq!(2, template.sql.matches("$1").count());
    }

    #[test]
    fn derived_table_and_correlated_columns() {
        let mut inner = SelectExpr::new(ScopeId(1));
        let o = inner.add_table("o", base("orders"), JoinType::From);
        inner.projections.push(ProjectionExpr {
            expr: column(o, "customer_id", DataType::Int32),
            alias: "customer_id".to_string(),
        });

        let mut outer = SelectExpr::new(ScopeId(0));
        let c = outer.add_table("c", base("customers"), JoinType::From);
        let s = outer.add_table(
            "s",
            TableSource::Derived(Box::new(inner)),
            JoinType::LeftOuter(lit(true)),
        );
        let cond = eq(
            column(c, "id", DataType::Int32),
            column(s, "customer_id", DataType::Int32),
        );
        *outer.tables[1].join.condition_mut().unwrap() = cond;
        outer.add_projection(concat(column(c, "name", DataType::Utf8), lit("!")), "n");

        let template = generate(&AnsiDialect, &outer).unwrap();
        assert_eq!(
            "SELECT (\"c\".\"name\" || '!') AS \"n\" FROM \"customers\" AS \"c\" LEFT JOIN (SELECT \"o\".\"customer_id\" AS \"customer_id\" FROM \"orders\" AS \"o\") AS \"s\" ON (\"c\".\"id\" = \"s\".\"customer_id\")",
            template.sql
        );
    }

    #[test]
    fn unexpanded_array_parameter_errors() {
        let mut select = SelectExpr::new(ScopeId(0));
        let c = select.add_table("c", base("customers"), JoinType::From);
        select.add_predicate(SqlExpr::In(InExpr {
            needle: Box::new(column(c, "id", DataType::Int32)),
            values: InValues::Parameter(ParameterExpr {
                name: "ids".to_string(),
                datatype: DataType::List(Box::new(DataType::Int32)),
                element: None,
            }),
            negated: false,
        }));

        generate(&AnsiDialect, &select).unwrap_err();
    }

    #[test]
    fn dangling_column_errors() {
        let mut select = SelectExpr::new(ScopeId(0));
        select.add_table("c", base("customers"), JoinType::From);
        select.add_projection(column(TableRef::new(ScopeId(7), 0), "id", DataType::Int32), "id");

        generate(&AnsiDialect, &select).unwrap_err();
    }

    #[test]
    fn bind_array_elements() {
        let template = CommandTemplate {
            sql: String::new(),
            parameters: vec![
                ParameterPlaceholder {
                    name: "ids".to_string(),
                    element: Some(1),
                },
                ParameterPlaceholder {
                    name: "name".to_string(),
                    element: None,
                },
            ],
        };
        let values: ParameterValues = [
            ("ids".to_string(), ScalarValue::List(vec![1.into(), 2.into()])),
            ("name".to_string(), "a".into()),
        ]
        .into_iter()
        .collect();

        let bound = template.bind(&values).unwrap();
        assert_eq!(vec![ScalarValue::Int32(2), ScalarValue::from("a")], bound);

        template.bind(&ParameterValues::new()).unwrap_err();
    }

    #[test]
    fn in_list_rendering() {
        let mut select = SelectExpr::new(ScopeId(0));
        let c = select.add_table("c", base("customers"), JoinType::From);
        select.add_predicate(in_list(column(c, "id", DataType::Int32), vec![lit(1), lit(2)]));
        let template = generate(&AnsiDialect, &select).unwrap();
        assert!(template.sql.ends_with("WHERE \"c\".\"id\" IN (1, 2)"), "{}", template.sql);
    }
}
