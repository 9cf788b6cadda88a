use crate::{
    ast::{
        common::JoinKind,
        select::{FromClause, JoinClause, Select},
    },
    render::{Render, Renderer},
};

impl Render for Select {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("SELECT ");
        r.comma_separated(&self.columns, |r, col| col.render(r));

        if let Some(from) = &self.from {
            r.sql.push(' ');
            from.render(r);
        }

        for join in &self.joins {
            r.sql.push(' ');
            join.render(r);
        }

        if let Some(where_clause) = &self.where_clause {
            r.sql.push_str(" WHERE ");
            where_clause.render(r);
        }
    }
}

impl Render for FromClause {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("FROM ");
        r.render_table_ref(&self.table);
        r.push_alias(&self.alias);
    }
}

impl Render for JoinClause {
    fn render(&self, r: &mut Renderer) {
        let join_str = match self.kind {
            JoinKind::Inner => "INNER JOIN ",
            JoinKind::Left => "LEFT JOIN ",
        };
        r.sql.push_str(join_str);
        r.render_table_ref(&self.table);
        r.push_alias(&self.alias);
        r.sql.push_str(" ON ");
        self.on.render(r);
    }
}

#[cfg(test)]
mod tests {
    use wsync_core::TableId;

    use crate::{
        ast::{
            common::{JoinKind, TableRef},
            expr::Expr,
        },
        build::select::SelectBuilder,
        col,
        dialect::{BigQuery, Postgres},
        eq,
        render::{Render, Renderer},
    };

    #[test]
    fn renders_inner_join_with_filter() {
        let target = TableId::new(None, "sports", "players");
        let staging = TableId::new(None, "sports", "tmp__players");
        let ast = SelectBuilder::new()
            .select(vec![Expr::Wildcard {
                qualifier: Some("SRC".into()),
            }])
            .from(TableRef::from(&target), Some("TGT"))
            .join(
                JoinKind::Inner,
                TableRef::from(&staging),
                Some("SRC"),
                eq(col("TGT", "id"), col("SRC", "id")),
            )
            .where_clause(col("TGT", "audit_column__active_flag"))
            .build();

        let mut r = Renderer::new(&Postgres);
        ast.render(&mut r);
        let (sql, params) = r.finish();
        assert!(params.is_empty());
        assert_eq!(
            sql,
            r#"SELECT "SRC".* FROM "sports"."players" AS "TGT" INNER JOIN "sports"."tmp__players" AS "SRC" ON ("TGT"."id" = "SRC"."id") WHERE "TGT"."audit_column__active_flag""#
        );
    }

    #[test]
    fn renders_left_join_for_bigquery() {
        let ast = SelectBuilder::new()
            .select(vec![col("SRC", "id")])
            .from(TableRef::new("staging"), Some("SRC"))
            .join(
                JoinKind::Left,
                TableRef::new("target"),
                Some("TGT"),
                eq(col("SRC", "id"), col("TGT", "id")),
            )
            .where_clause(col("TGT", "id").is_null())
            .build();

        let mut r = Renderer::new(&BigQuery);
        ast.render(&mut r);
        let (sql, _) = r.finish();
        assert_eq!(
            sql,
            "SELECT `SRC`.`id` FROM `staging` AS `SRC` LEFT JOIN `target` AS `TGT` ON (`SRC`.`id` = `TGT`.`id`) WHERE (`TGT`.`id` IS NULL)"
        );
    }
}
