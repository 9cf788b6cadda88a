use crate::{
    ast::ddl::{AlterAction, AlterTable, CreateSchema, CreateTable, CreateTableAs, DropTable},
    render::{Render, Renderer},
};

impl Render for CreateSchema {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("CREATE SCHEMA ");
        if self.if_not_exists {
            r.sql.push_str("IF NOT EXISTS ");
        }
        let schema = r
            .dialect
            .render_schema_ref(self.project.as_deref(), &self.name);
        r.sql.push_str(&schema);
    }
}

impl Render for CreateTable {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("CREATE TABLE ");
        if self.if_not_exists {
            r.sql.push_str("IF NOT EXISTS ");
        }
        r.render_table_ref(&self.table);
        r.sql.push_str(" (");
        r.comma_separated(&self.columns, |r, column| {
            r.push_identifier(&column.name);
            r.sql.push(' ');
            let ty = r.dialect.render_data_type(&column.column_type);
            r.sql.push_str(&ty);
        });
        r.sql.push(')');
    }
}

impl Render for CreateTableAs {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("CREATE TABLE ");
        r.render_table_ref(&self.table);
        r.sql.push_str(" AS ");
        self.query.render(r);
    }
}

impl Render for DropTable {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("DROP TABLE ");
        if self.if_exists {
            r.sql.push_str("IF EXISTS ");
        }
        r.render_table_ref(&self.table);
    }
}

impl Render for AlterTable {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("ALTER TABLE ");
        r.render_table_ref(&self.table);
        match &self.action {
            AlterAction::AddColumn(column) => {
                r.sql.push_str(" ADD COLUMN ");
                r.push_identifier(&column.name);
                r.sql.push(' ');
                let ty = r.dialect.render_data_type(&column.column_type);
                r.sql.push_str(&ty);
            }
            AlterAction::AlterColumnType { column, data_type } => {
                r.sql.push_str(" ALTER COLUMN ");
                r.push_identifier(column);
                r.sql.push_str(" SET DATA TYPE ");
                let ty = r.dialect.render_data_type(data_type);
                r.sql.push_str(&ty);
            }
        }
    }
}
