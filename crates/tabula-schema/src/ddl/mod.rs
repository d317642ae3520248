//! DDL (Data Definition Language) generation from entity metadata.
//!
//! Schema synchronization drives these statements; each dialect supplies its own
//! column types and key definitions while the statement shapes are shared.

mod postgres;
mod sqlite;

pub use postgres::PostgresDdlGenerator;
pub use sqlite::SqliteDdlGenerator;

use tabula_core::{Dialect, EntityMetadata, PropertyMapping, ReferenceKind, SqlType};

/// Generates DDL statements for one dialect.
pub trait DdlGenerator {
    fn dialect(&self) -> Dialect;

    /// Backend column type for a property data type.
    fn column_type(&self, sql_type: &SqlType) -> String;

    /// Column definition for the object-id mapping, including its key clause.
    fn object_id_definition(&self, mapping: &PropertyMapping) -> String;

    /// Column definition for any persisted mapping.
    fn column_definition(&self, mapping: &PropertyMapping) -> String {
        if mapping.is_object_id() {
            return self.object_id_definition(mapping);
        }
        let mut def = format!(
            "{} {}",
            quote(self, mapping.field_name()),
            self.column_type(&mapping.data_type())
        );
        if mapping.reference_kind() == Some(ReferenceKind::ToOne) {
            if let Some(target) = mapping.referenced_entity() {
                if let Some(target_id) = target.object_id_mapping() {
                    def.push_str(&format!(
                        " REFERENCES {}({})",
                        quote(self, target.table_name()),
                        quote(self, target_id.field_name())
                    ));
                }
            }
        }
        def
    }

    /// `CREATE TABLE "T"(...)` over every persisted mapping of `metadata`.
    ///
    /// `table_name` may differ from the entity's table when building a shadow table.
    fn generate_create_table(&self, metadata: &EntityMetadata, table_name: &str) -> String {
        tracing::debug!(
            dialect = self.dialect().name(),
            entity = metadata.class_name(),
            table = table_name,
            "Generating CREATE TABLE"
        );
        let columns: Vec<String> = metadata
            .property_mappings()
            .iter()
            .filter(|m| !m.is_transient())
            .map(|m| self.column_definition(m))
            .collect();
        format!("CREATE TABLE {}({})", quote(self, table_name), columns.join(","))
    }

    fn generate_drop_table(&self, table_name: &str) -> String {
        format!("DROP TABLE {}", quote(self, table_name))
    }

    fn generate_alter_table_add_column(&self, table_name: &str, mapping: &PropertyMapping) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote(self, table_name),
            self.column_definition(mapping)
        )
    }

    fn generate_rename_table(&self, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(self, old_name),
            quote(self, new_name)
        )
    }

    /// Copy a column subset from `source` into `destination`.
    fn generate_insert_into(
        &self,
        destination: &str,
        destination_columns: &[String],
        source: &str,
        source_columns: &[String],
    ) -> String {
        let list = |cols: &[String]| {
            cols.iter()
                .map(|c| quote(self, c))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "INSERT INTO {}({}) SELECT {} FROM {}",
            quote(self, destination),
            list(destination_columns),
            list(source_columns),
            quote(self, source)
        )
    }
}

fn quote<G: DdlGenerator + ?Sized>(generator: &G, name: &str) -> String {
    generator.dialect().quote_identifier(name)
}

/// Create a DDL generator for the given dialect.
pub fn generator_for_dialect(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteDdlGenerator),
        Dialect::Postgres => Box::new(PostgresDdlGenerator),
    }
}
