use crate::{
    ast::dml::{Assignment, Insert, InsertSource, Update},
    render::{Render, Renderer},
};

impl Render for Insert {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("INSERT INTO ");
        r.render_table_ref(&self.table);
        r.sql.push_str(" (");
        r.comma_separated(&self.columns, |r, column| r.push_identifier(column));
        r.sql.push_str(") ");

        match &self.source {
            InsertSource::Values(rows) => {
                r.sql.push_str("VALUES ");
                r.comma_separated(rows, |r, row| {
                    r.sql.push('(');
                    r.comma_separated(row, |r, value| value.render(r));
                    r.sql.push(')');
                });
            }
            InsertSource::Select(select) => select.render(r),
        }
    }
}

impl Render for Update {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("UPDATE ");
        r.render_table_ref(&self.table);
        r.push_alias(&self.alias);
        r.sql.push_str(" SET ");
        r.comma_separated(&self.assignments, |r, assignment| assignment.render(r));

        if let Some(from) = &self.from {
            r.sql.push(' ');
            from.render(r);
        }

        // BigQuery rejects an UPDATE without a WHERE clause.
        r.sql.push_str(" WHERE ");
        match &self.where_clause {
            Some(condition) => condition.render(r),
            None => r.sql.push_str("TRUE"),
        }
    }
}

impl Render for Assignment {
    fn render(&self, r: &mut Renderer) {
        r.push_identifier(&self.column);
        r.sql.push_str(" = ");
        self.value.render(r);
    }
}

#[cfg(test)]
mod tests {
    use wsync_core::{TableId, Value};

    use crate::{
        ast::{common::TableRef, expr::Expr},
        build::dml::{InsertBuilder, UpdateBuilder},
        col,
        dialect::{BigQuery, Postgres},
        eq, literal,
        render::{Render, Renderer},
        value,
    };

    #[test]
    fn renders_multi_row_values_insert() {
        let ast = InsertBuilder::new(TableRef::from(&TableId::new(None, "s", "t")))
            .columns(&["id", "name"])
            .values(vec![
                vec![value(Value::Int(1)), value(Value::String("a".into()))],
                vec![value(Value::Int(2)), value(Value::Null)],
            ])
            .build();

        let mut r = Renderer::new(&Postgres);
        ast.render(&mut r);
        let (sql, params) = r.finish();
        assert_eq!(
            sql,
            r#"INSERT INTO "s"."t" ("id", "name") VALUES ($1, $2), ($3, NULL)"#
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn renders_update_from_with_alias() {
        let ast = UpdateBuilder::new(TableRef::new("target"), Some("TGT"))
            .set("audit_column__active_flag", literal(Value::Bool(false)))
            .set("audit_column__end_datetime_utc", Expr::CurrentTimestamp)
            .from(TableRef::new("changes"), Some("COMPARE"))
            .where_clause(eq(col("TGT", "id"), col("COMPARE", "id")))
            .build();

        let mut r = Renderer::new(&BigQuery);
        ast.render(&mut r);
        let (sql, params) = r.finish();
        assert!(params.is_empty());
        assert_eq!(
            sql,
            "UPDATE `target` AS `TGT` SET `audit_column__active_flag` = FALSE, `audit_column__end_datetime_utc` = CURRENT_TIMESTAMP() FROM `changes` AS `COMPARE` WHERE (`TGT`.`id` = `COMPARE`.`id`)"
        );
    }

    #[test]
    fn update_without_filter_renders_where_true() {
        let ast = UpdateBuilder::new(TableRef::new("t"), None)
            .set("x", literal(Value::Int(1)))
            .build();
        let mut r = Renderer::new(&Postgres);
        ast.render(&mut r);
        let (sql, _) = r.finish();
        assert_eq!(sql, r#"UPDATE "t" SET "x" = 1 WHERE TRUE"#);
    }
}
