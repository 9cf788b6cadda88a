//! Defines the core rendering trait and context for converting AST to SQL.

use wsync_core::Value;

use crate::{
    ast::{common::TableRef, Statement},
    dialect::Dialect,
};

pub mod ddl;
pub mod dml;
pub mod expr;
pub mod select;

/// A trait for any AST node that can be rendered into SQL text.
pub trait Render {
    fn render(&self, renderer: &mut Renderer);
}

/// Accumulates SQL text and bound parameters for one statement.
pub struct Renderer<'a> {
    pub sql: String,
    pub params: Vec<Value>,
    pub dialect: &'a dyn Dialect,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            dialect,
        }
    }

    /// Consumes the renderer and returns the final SQL string and parameters.
    pub fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    pub fn add_param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.get_placeholder(self.params.len() - 1);
        self.sql.push_str(&placeholder);
    }

    pub fn render_table_ref(&mut self, table: &TableRef) {
        let rendered = self.dialect.render_table_ref(table);
        self.sql.push_str(&rendered);
    }

    pub fn push_identifier(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    pub fn push_alias(&mut self, alias: &Option<String>) {
        if let Some(alias) = alias {
            self.sql.push_str(" AS ");
            self.push_identifier(alias);
        }
    }

    /// Renders `items` separated by `, `.
    pub fn comma_separated<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            each(self, item);
        }
    }
}

impl Render for Statement {
    fn render(&self, r: &mut Renderer) {
        match self {
            Statement::CreateSchema(s) => s.render(r),
            Statement::CreateTable(s) => s.render(r),
            Statement::CreateTableAs(s) => s.render(r),
            Statement::DropTable(s) => s.render(r),
            Statement::AlterTable(s) => s.render(r),
            Statement::Insert(s) => s.render(r),
            Statement::Update(s) => s.render(r),
            Statement::Select(s) => s.render(r),
        }
    }
}

/// Renders one statement for `dialect`.
pub fn render(statement: &Statement, dialect: &dyn Dialect) -> (String, Vec<Value>) {
    let mut renderer = Renderer::new(dialect);
    statement.render(&mut renderer);
    renderer.finish()
}
