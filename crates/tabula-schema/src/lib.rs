//! Schema DDL generation and live-table validation for Tabula.
//!
//! `tabula-schema` turns entity metadata into `CREATE TABLE` and friends for each
//! supported dialect, and diffs a live table against its entity so schema
//! synchronization can decide between leaving it alone, extending it or rebuilding it.

pub mod ddl;
pub mod validate;

#[cfg(test)]
mod fixtures;

pub use ddl::{DdlGenerator, PostgresDdlGenerator, SqliteDdlGenerator, generator_for_dialect};
pub use validate::{
    Affinity, SchemaMismatch, affinity, copyable_columns, is_compatible, missing_columns,
    validate_table,
};
