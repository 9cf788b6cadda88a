use crate::{
    ast::expr::{BinaryOp, BinaryOperator, Expr, Ident},
    render::{Render, Renderer},
};
use wsync_core::{ColumnType, Value};

impl Render for Expr {
    fn render(&self, r: &mut Renderer) {
        match self {
            Expr::Identifier(ident) => ident.render(r),
            Expr::Value(Value::Null) => r.sql.push_str("NULL"),
            Expr::Value(val @ Value::Numeric(_)) => {
                // Decimal text binds as a string parameter.
                r.sql.push_str("CAST(");
                r.add_param(val.clone());
                r.sql.push_str(" AS ");
                r.sql
                    .push_str(&r.dialect.render_data_type(&ColumnType::Numeric));
                r.sql.push(')');
            }
            Expr::Value(val) => r.add_param(val.clone()),
            Expr::Literal(val) => {
                let text = r.dialect.render_literal(val);
                r.sql.push_str(&text);
            }
            Expr::BinaryOp(op) => op.render(r),
            Expr::IsNull { expr, negated } => {
                r.sql.push('(');
                expr.render(r);
                r.sql
                    .push_str(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::TextCast(expr) => {
                r.sql.push_str(r.dialect.tolerant_cast());
                r.sql.push('(');
                expr.render(r);
                r.sql.push_str(" AS ");
                r.sql
                    .push_str(&r.dialect.render_data_type(&ColumnType::String));
                r.sql.push(')');
            }
            Expr::Cast { expr, data_type } => {
                r.sql.push_str("CAST(");
                expr.render(r);
                r.sql.push_str(" AS ");
                r.sql.push_str(&r.dialect.render_data_type(data_type));
                r.sql.push(')');
            }
            Expr::SafeCast { expr, data_type } => {
                let start = r.sql.len();
                expr.render(r);
                let operand = r.sql.split_off(start);
                let text = r.dialect.render_safe_cast(&operand, data_type);
                r.sql.push_str(&text);
            }
            Expr::CurrentTimestamp => r.sql.push_str(r.dialect.current_timestamp()),
            Expr::Wildcard { qualifier } => {
                if let Some(qualifier) = qualifier {
                    r.push_identifier(qualifier);
                    r.sql.push('.');
                }
                r.sql.push('*');
            }
            Expr::Alias { expr, alias } => {
                expr.render(r);
                r.sql.push_str(" AS ");
                r.push_identifier(alias);
            }
        }
    }
}

impl Render for Ident {
    fn render(&self, r: &mut Renderer) {
        if let Some(qualifier) = &self.qualifier {
            r.push_identifier(qualifier);
            r.sql.push('.');
        }
        r.push_identifier(&self.name);
    }
}

impl Render for BinaryOp {
    fn render(&self, r: &mut Renderer) {
        r.sql.push('(');
        self.left.render(r);

        let op_str = match self.op {
            BinaryOperator::Eq => " = ",
            BinaryOperator::NotEq => " <> ",
            BinaryOperator::IsDistinctFrom => " IS DISTINCT FROM ",
            BinaryOperator::And => " AND ",
            BinaryOperator::Or => " OR ",
        };
        r.sql.push_str(op_str);

        self.right.render(r);
        r.sql.push(')');
    }
}

#[cfg(test)]
mod tests {
    use wsync_core::{ColumnType, Value};

    use crate::{
        ast::expr::{BinaryOperator, Expr},
        binary, col,
        dialect::{BigQuery, Postgres},
        literal,
        render::{Render, Renderer},
        value,
    };

    fn render_pg(expr: &Expr) -> (String, Vec<Value>) {
        let mut r = Renderer::new(&Postgres);
        expr.render(&mut r);
        r.finish()
    }

    #[test]
    fn text_cast_comparison_per_dialect() {
        let expr = binary(
            col("SRC", "rank").text_cast(),
            BinaryOperator::IsDistinctFrom,
            col("TGT", "rank").text_cast(),
        );

        let (sql, _) = render_pg(&expr);
        assert_eq!(
            sql,
            r#"(CAST("SRC"."rank" AS TEXT) IS DISTINCT FROM CAST("TGT"."rank" AS TEXT))"#
        );

        let mut r = Renderer::new(&BigQuery);
        expr.render(&mut r);
        let (sql, _) = r.finish();
        assert_eq!(
            sql,
            "(SAFE_CAST(`SRC`.`rank` AS STRING) IS DISTINCT FROM SAFE_CAST(`TGT`.`rank` AS STRING))"
        );
    }

    #[test]
    fn params_are_numbered_and_null_is_inline() {
        let expr = binary(
            value(Value::Int(4)),
            BinaryOperator::And,
            binary(value(Value::Null), BinaryOperator::Eq, value(Value::String("x".into()))),
        );
        let (sql, params) = render_pg(&expr);
        assert_eq!(sql, "($1 AND (NULL = $2))");
        assert_eq!(params, vec![Value::Int(4), Value::String("x".into())]);
    }

    #[test]
    fn numeric_params_bind_as_text() {
        let (sql, params) = render_pg(&value(Value::Numeric("2.50".into())));
        assert_eq!(sql, "CAST($1 AS NUMERIC)");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn typed_null_and_alias() {
        let expr = literal(Value::Null)
            .cast(ColumnType::Timestamp)
            .alias("audit_column__end_datetime_utc");
        let (sql, params) = render_pg(&expr);
        assert!(params.is_empty());
        assert_eq!(
            sql,
            r#"CAST(NULL AS TIMESTAMPTZ) AS "audit_column__end_datetime_utc""#
        );
    }

    #[test]
    fn safe_cast_is_guarded_on_postgres() {
        let expr = col("COMPARE", "rank").safe_cast(ColumnType::Int64);

        let (sql, _) = render_pg(&expr);
        assert_eq!(
            sql,
            concat!(
                r#"CASE WHEN CAST("COMPARE"."rank" AS TEXT) ~* '^\s*[-+]?[0-9]{1,18}\s*$' "#,
                r#"THEN CAST("COMPARE"."rank" AS BIGINT) END"#
            )
        );

        let mut r = Renderer::new(&BigQuery);
        expr.render(&mut r);
        assert_eq!(r.finish().0, "SAFE_CAST(`COMPARE`.`rank` AS INT64)");
    }

    #[test]
    fn safe_cast_reuses_the_operand_placeholder() {
        let (sql, params) = render_pg(&value(Value::String("7".into())).safe_cast(ColumnType::Float64));
        assert_eq!(params, vec![Value::String("7".into())]);
        assert!(sql.starts_with("CASE WHEN CAST($1 AS TEXT) ~* "));
        assert!(sql.ends_with("THEN CAST($1 AS DOUBLE PRECISION) END"));
        assert_eq!(
            render_pg(&col("SRC", "v").safe_cast(ColumnType::String)).0,
            r#"CAST("SRC"."v" AS TEXT)"#
        );
    }

    #[test]
    fn is_null_wraps_in_parens() {
        let (sql, _) = render_pg(&col("TGT", "id").is_null());
        assert_eq!(sql, r#"("TGT"."id" IS NULL)"#);
    }
}
