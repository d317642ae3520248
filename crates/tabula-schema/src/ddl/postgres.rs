//! PostgreSQL DDL generator.

use super::DdlGenerator;
use tabula_core::{Dialect, PropertyMapping, SqlType};

/// DDL generator for PostgreSQL.
pub struct PostgresDdlGenerator;

impl DdlGenerator for PostgresDdlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn column_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::TinyInt | SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Char(len) => format!("CHAR({})", len),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::DateTime | SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSONB".to_string(),
            other if other.is_integral() => "BIGINT".to_string(),
            other if other.is_text() => "TEXT".to_string(),
            _ => "BYTEA".to_string(),
        }
    }

    fn object_id_definition(&self, mapping: &PropertyMapping) -> String {
        let data_type = mapping.data_type();
        let column = self.dialect().quote_identifier(mapping.field_name());
        if mapping.is_autogenerated() && data_type.is_integral() {
            let serial = match data_type {
                SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer => "SERIAL",
                _ => "BIGSERIAL",
            };
            format!("{} {} PRIMARY KEY", column, serial)
        } else {
            format!("{} {} PRIMARY KEY", column, self.column_type(&data_type))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::generator_for_dialect;
    use crate::fixtures::Town;
    use tabula_core::Entity;

    #[test]
    fn create_table_uses_serial_keys() {
        let ddl = PostgresDdlGenerator;
        let sql = ddl.generate_create_table(Town::metadata(), "town");
        assert_eq!(
            sql,
            "CREATE TABLE \"town\"(\"id\" BIGSERIAL PRIMARY KEY,\"name\" TEXT,\"province_id\" BIGINT REFERENCES \"Province\"(\"id\"))"
        );
    }

    #[test]
    fn dialect_dispatch() {
        assert_eq!(generator_for_dialect(Dialect::Postgres).dialect(), Dialect::Postgres);
        assert_eq!(
            generator_for_dialect(Dialect::Postgres).column_type(&SqlType::Blob),
            "BYTEA"
        );
        assert_eq!(
            generator_for_dialect(Dialect::Sqlite).column_type(&SqlType::Blob),
            "BLOB"
        );
    }
}
