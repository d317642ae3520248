//! SQLite DDL generator.
//!
//! SQLite stores values by affinity, so property types collapse onto five column
//! types. Autogenerated integral ids use `INTEGER PRIMARY KEY AUTOINCREMENT`.

use super::DdlGenerator;
use tabula_core::{Dialect, PropertyMapping, SqlType};

/// DDL generator for SQLite.
pub struct SqliteDdlGenerator;

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn column_type(&self, sql_type: &SqlType) -> String {
        let name = if sql_type.is_integral() {
            "INTEGER"
        } else if sql_type.is_floating() {
            "REAL"
        } else if sql_type.is_boolean() || sql_type.is_temporal() {
            "NUMERIC"
        } else if sql_type.is_text() {
            "TEXT"
        } else {
            "BLOB"
        };
        name.to_string()
    }

    fn object_id_definition(&self, mapping: &PropertyMapping) -> String {
        let data_type = mapping.data_type();
        let column = self.dialect().quote_identifier(mapping.field_name());
        if mapping.is_autogenerated() && data_type.is_integral() {
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column)
        } else {
            format!("{} {} PRIMARY KEY", column, self.column_type(&data_type))
        }
    }
}
