use crate::ast::{
    common::TableRef,
    dml::{Assignment, Insert, InsertSource, Update},
    expr::Expr,
    select::{FromClause, Select},
};

#[derive(Debug, Clone)]
pub struct InsertBuilder {
    ast: Insert,
}

impl InsertBuilder {
    pub fn new(table: TableRef) -> Self {
        Self {
            ast: Insert {
                table,
                columns: Vec::new(),
                source: InsertSource::Values(Vec::new()),
            },
        }
    }

    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.ast.columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn values(mut self, rows: Vec<Vec<Expr>>) -> Self {
        self.ast.source = InsertSource::Values(rows);
        self
    }

    pub fn select(mut self, query: Select) -> Self {
        self.ast.source = InsertSource::Select(Box::new(query));
        self
    }

    pub fn build(self) -> Insert {
        self.ast
    }
}

#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    ast: Update,
}

impl UpdateBuilder {
    pub fn new(table: TableRef, alias: Option<&str>) -> Self {
        Self {
            ast: Update {
                table,
                alias: alias.map(String::from),
                assignments: Vec::new(),
                from: None,
                where_clause: None,
            },
        }
    }

    pub fn set(mut self, column: &str, value: Expr) -> Self {
        self.ast.assignments.push(Assignment {
            column: column.to_string(),
            value,
        });
        self
    }

    pub fn from(mut self, table: TableRef, alias: Option<&str>) -> Self {
        self.ast.from = Some(FromClause {
            table,
            alias: alias.map(String::from),
        });
        self
    }

    pub fn where_clause(mut self, condition: Expr) -> Self {
        self.ast.where_clause = Some(condition);
        self
    }

    pub fn build(self) -> Update {
        self.ast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ident, value};
    use wsync_core::Value;

    #[test]
    fn insert_builder_switches_source() {
        let ast = InsertBuilder::new(TableRef::new("t"))
            .columns(&["a"])
            .values(vec![vec![value(Value::Int(1))]])
            .select(Select::default())
            .build();
        assert_eq!(ast.columns, vec!["a".to_string()]);
        assert!(matches!(ast.source, InsertSource::Select(_)));
    }

    #[test]
    fn update_builder_keeps_assignment_order() {
        let ast = UpdateBuilder::new(TableRef::new("t"), Some("TGT"))
            .set("b", ident("x"))
            .set("a", ident("y"))
            .build();
        let columns: Vec<_> = ast.assignments.iter().map(|a| a.column.as_str()).collect();
        assert_eq!(columns, vec!["b", "a"]);
        assert_eq!(ast.alias.as_deref(), Some("TGT"));
    }
}
