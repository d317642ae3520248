//! Schema synchronization between entity metadata and live tables.
//!
//! Each entity is synchronized at most once per provider. The schema mode comes from
//! the entity's `"schema"` user metadata, falling back to the provider configuration.
//! Referenced entities are synchronized recursively before the root is marked
//! checked; an in-progress set stops the recursion on cyclic references.

use crate::provider::Provider;
use std::any::TypeId;
use std::collections::HashSet;
use tabula_core::{
    ColumnDescriptor, EntityMetadata, Error, ReferenceKind, Result, SCHEMA_MODE_KEY, SchemaMode,
    SchemaSyncError, SqlBackend,
};
use tabula_query::Relation;
use tabula_schema::{SchemaMismatch, copyable_columns, missing_columns, validate_table};

/// Per-provider synchronization bookkeeping.
#[derive(Debug, Default)]
pub struct SchemaState {
    checked: HashSet<TypeId>,
    in_progress: HashSet<TypeId>,
}

impl SchemaState {
    pub fn is_checked(&self, metadata: &EntityMetadata) -> bool {
        self.checked.contains(&metadata.type_id())
    }
}

fn schema_error(table: &str, error: Error) -> Error {
    match error {
        Error::UnsynchronizedSchema(e) => Error::UnsynchronizedSchema(e),
        other => Error::UnsynchronizedSchema(SchemaSyncError {
            table: table.to_string(),
            message: other.message(),
            mismatches: Vec::new(),
        }),
    }
}

fn mismatch_error(table: &str, mismatches: &[SchemaMismatch]) -> Error {
    let mismatches: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
    Error::UnsynchronizedSchema(SchemaSyncError {
        table: table.to_string(),
        message: format!(
            "Table '{}' does not match its entity: {}",
            table,
            mismatches.join("; ")
        ),
        mismatches,
    })
}

impl<B: SqlBackend> Provider<B> {
    /// Schema mode that applies to `metadata`.
    ///
    /// # Panics
    ///
    /// Panics when the entity carries an unrecognized `"schema"` override.
    pub fn schema_mode_for(&self, metadata: &EntityMetadata) -> SchemaMode {
        match metadata.user_metadata(SCHEMA_MODE_KEY) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                panic!(
                    "{} declares unknown schema mode '{}'",
                    metadata.class_name(),
                    raw
                )
            }),
            None => self.configuration().schema_mode,
        }
    }

    /// Synchronize the entity behind `relation`, looking through subqueries.
    pub fn synchronize_relation(&mut self, relation: &Relation) -> Result<()> {
        match relation {
            Relation::Entity(metadata) => self.synchronize(metadata),
            Relation::Query(inner) => self.synchronize_relation(inner.relation()),
        }
    }

    /// Synchronize `metadata` and everything it references.
    pub fn synchronize(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let key = metadata.type_id();
        if self.schema.checked.contains(&key) || !self.schema.in_progress.insert(key) {
            return Ok(());
        }

        let result = self.synchronize_table(metadata).and_then(|()| {
            for mapping in metadata.property_mappings() {
                if mapping.reference_kind().is_some() {
                    if let Some(target) = mapping.referenced_entity() {
                        self.synchronize(target)?;
                    }
                }
            }
            Ok(())
        });

        self.schema.in_progress.remove(&key);
        if result.is_ok() {
            self.schema.checked.insert(key);
        }
        result
    }

    fn synchronize_table(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let mode = self.schema_mode_for(metadata);
        tracing::debug!(
            entity = metadata.class_name(),
            table = metadata.table_name(),
            mode = %mode,
            "Synchronizing schema"
        );
        match mode {
            SchemaMode::Bypass => Ok(()),
            SchemaMode::Recreate => self.recreate_table(metadata),
            SchemaMode::Update => self.update_table(metadata),
            SchemaMode::Validate => self.validate_schema(metadata),
            SchemaMode::Append => self.append_table(metadata),
        }
    }

    fn live_columns(&mut self, table: &str) -> Result<Option<Vec<ColumnDescriptor>>> {
        let exists = self.backend_mut().tables()?.contains(table);
        if !exists {
            return Ok(None);
        }
        self.backend_mut().record(table).map(Some)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        tracing::info!(sql = %sql, "Applying schema change");
        self.run_execute(sql, &[]).map(|_| ())
    }

    /// Run `f` inside a provider transaction level, mapping failures to schema errors.
    fn transactional<F>(&mut self, table: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin_transaction().map_err(|e| schema_error(table, e))?;
        match f(self) {
            Ok(()) => self.commit_transaction().map_err(|e| schema_error(table, e)),
            Err(e) => {
                if let Err(rollback) = self.rollback_transaction() {
                    tracing::warn!(table, error = %rollback, "Rollback after schema failure failed");
                }
                Err(schema_error(table, e))
            }
        }
    }

    fn create_table(&mut self, metadata: &EntityMetadata) -> Result<()> {
        let sql = self
            .ddl
            .generate_create_table(metadata, metadata.table_name());
        self.execute_ddl(&sql)
    }

    /// Drop and create. Existing rows are lost.
    fn recreate_table(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let table = metadata.table_name();
        let exists = self
            .backend_mut()
            .tables()
            .map_err(|e| schema_error(table, e))?
            .contains(table);
        self.transactional(table, |p| {
            if exists {
                let sql = p.ddl.generate_drop_table(table);
                p.execute_ddl(&sql)?;
            }
            p.create_table(metadata)
        })
    }

    fn update_table(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let table = metadata.table_name();
        let Some(columns) = self
            .live_columns(table)
            .map_err(|e| schema_error(table, e))?
        else {
            return self.transactional(table, |p| p.create_table(metadata));
        };

        let diff = validate_table(self.ddl.as_ref(), metadata, &columns);
        if diff.is_empty() {
            return Ok(());
        }
        tracing::info!(
            table,
            mismatches = diff.len(),
            "Rebuilding table to match its entity"
        );
        self.rebuild_table(metadata, &columns)
    }

    /// Copy the mapped columns of `table` into a freshly created shadow table,
    /// then swap the shadow in.
    fn rebuild_table(
        &mut self,
        metadata: &'static EntityMetadata,
        columns: &[ColumnDescriptor],
    ) -> Result<()> {
        let table = metadata.table_name();
        let shadow = format!("{}_{:032x}", table, rand::random::<u128>());
        let copy = copyable_columns(metadata, columns);

        let foreign_keys = self
            .backend_mut()
            .foreign_keys_enabled()
            .map_err(|e| schema_error(table, e))?;
        // The pragma is a no-op while a transaction is open.
        let suspend = foreign_keys && !self.in_transaction();
        if foreign_keys && !suspend {
            tracing::warn!(
                table,
                depth = self.transaction_depth(),
                "Rebuilding inside an open transaction; foreign keys stay enforced"
            );
        }
        if suspend {
            self.backend_mut()
                .set_foreign_keys_enabled(false)
                .map_err(|e| schema_error(table, e))?;
        }

        let result = self.transactional(table, |p| {
            let create = p.ddl.generate_create_table(metadata, &shadow);
            p.execute_ddl(&create)?;
            if !copy.is_empty() {
                let insert = p.ddl.generate_insert_into(&shadow, &copy, table, &copy);
                p.execute_ddl(&insert)?;
            }
            let drop = p.ddl.generate_drop_table(table);
            p.execute_ddl(&drop)?;
            let rename = p.ddl.generate_rename_table(&shadow, table);
            p.execute_ddl(&rename)?;
            if foreign_keys {
                p.backend_mut().check_foreign_keys()?;
            }
            Ok(())
        });

        if suspend {
            if let Err(e) = self.backend_mut().set_foreign_keys_enabled(true) {
                tracing::warn!(table, error = %e, "Failed to restore foreign key enforcement");
            }
        }
        result
    }

    /// Fail on any difference. Never touches the database.
    fn validate_schema(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let table = metadata.table_name();
        let Some(columns) = self
            .live_columns(table)
            .map_err(|e| schema_error(table, e))?
        else {
            return Err(mismatch_error(
                table,
                &[SchemaMismatch::MissingTable {
                    table: table.to_string(),
                }],
            ));
        };
        let diff = validate_table(self.ddl.as_ref(), metadata, &columns);
        if diff.is_empty() {
            Ok(())
        } else {
            Err(mismatch_error(table, &diff))
        }
    }

    /// Create the table or add its missing columns. Nothing is dropped or altered.
    fn append_table(&mut self, metadata: &'static EntityMetadata) -> Result<()> {
        let table = metadata.table_name();
        let columns = self
            .live_columns(table)
            .map_err(|e| schema_error(table, e))?;
        self.transactional(table, |p| match columns {
            None => p.create_table(metadata),
            Some(columns) => {
                for mapping in missing_columns(metadata, &columns) {
                    if mapping.reference_kind() == Some(ReferenceKind::ToMany) {
                        continue;
                    }
                    let sql = p.ddl.generate_alter_table_add_column(table, mapping);
                    p.execute_ddl(&sql)?;
                }
                Ok(())
            }
        })
    }
}
