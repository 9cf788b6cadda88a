//! Fluent builders producing statement ASTs.

pub mod ddl;
pub mod dml;
pub mod select;
