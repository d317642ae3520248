//! The provider: executes queries against a backend and hydrates entity graphs.
//!
//! A [`Provider`] owns one backend connection, the statement and DDL generators for
//! its dialect, the schema synchronization state, and a nested transaction counter.
//! Reads go through an [`EntityInstanceCache`] supplied by the caller so every
//! row maps onto at most one live instance.

use crate::identity_map::EntityInstanceCache;
use crate::schema_sync::SchemaState;
use std::collections::HashSet;
use tabula_core::{
    EntityMetadata, Error, Instance, InstanceId, ProviderConfiguration, PropertyMapping,
    PropertyValue, ReferenceKind, Result, Row, SqlBackend, Value,
};
use tabula_query::{Filter, FilterValue, Operation, Query, QueryFlags, StatementGenerator};
use tabula_schema::{DdlGenerator, generator_for_dialect};

/// Result of [`Provider::execute`].
#[derive(Debug, Clone)]
pub enum QueryOutput {
    /// Instances produced by a read
    Entities(Vec<Instance>),
    /// Rows removed by a delete
    RowsAffected(u64),
    /// Identifier generated by an insert, if any
    InsertedId(Option<Value>),
}

impl QueryOutput {
    pub fn into_entities(self) -> Vec<Instance> {
        match self {
            QueryOutput::Entities(instances) => instances,
            _ => Vec::new(),
        }
    }
}

/// Executes queries for one backend connection.
pub struct Provider<B: SqlBackend> {
    backend: B,
    configuration: ProviderConfiguration,
    generator: StatementGenerator,
    pub(crate) ddl: Box<dyn DdlGenerator>,
    pub(crate) schema: SchemaState,
    transaction_depth: usize,
}

fn unsaved_changes(instance: &Instance) -> Error {
    Error::entity(
        instance.metadata().class_name(),
        format!(
            "Entity instance {} has unsaved changes. Merge this instance or discard changes before reading.",
            instance.describe()
        ),
    )
}

fn column_value(row: &Row, mapping: &PropertyMapping) -> Result<Value> {
    row.get_by_name(mapping.field_name()).cloned().ok_or_else(|| {
        Error::provider(format!(
            "Column '{}' for property '{}' is missing from the result set",
            mapping.field_name(),
            mapping.class_property_name()
        ))
    })
}

impl<B: SqlBackend> Provider<B> {
    pub fn new(backend: B, configuration: ProviderConfiguration) -> Self {
        let dialect = backend.dialect();
        Self {
            backend,
            configuration,
            generator: StatementGenerator::new(dialect),
            ddl: generator_for_dialect(dialect),
            schema: SchemaState::default(),
            transaction_depth: 0,
        }
    }

    pub fn configuration(&self) -> &ProviderConfiguration {
        &self.configuration
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn generator(&self) -> &StatementGenerator {
        &self.generator
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.backend.is_open() {
            return Ok(());
        }
        tracing::debug!(
            dialect = self.generator.dialect().name(),
            database = %self.configuration.database_name,
            "Connecting"
        );
        self.backend.open()
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.backend.is_open() {
            return Ok(());
        }
        tracing::debug!(database = %self.configuration.database_name, "Disconnecting");
        self.transaction_depth = 0;
        self.backend.close()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_open()
    }

    /// Synchronize the schema behind `query`, then run it.
    ///
    /// # Panics
    ///
    /// Panics on a Merge query; the session resolves merges to Create or Update.
    pub fn execute(&mut self, query: &Query, cache: &mut EntityInstanceCache) -> Result<QueryOutput> {
        self.synchronize_relation(query.relation())?;
        match query.operation() {
            Operation::Read => self.read(query, cache).map(QueryOutput::Entities),
            Operation::Create | Operation::Update => self.merge(query).map(QueryOutput::InsertedId),
            Operation::Delete => self.remove(query).map(QueryOutput::RowsAffected),
            Operation::Merge => panic!(
                "Merge query on {} reached the provider; resolve it to Create or Update first",
                query.relation().entity().class_name()
            ),
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Run a select and hydrate one instance per row.
    pub fn read(&mut self, query: &Query, cache: &mut EntityInstanceCache) -> Result<Vec<Instance>> {
        let mut refreshing = HashSet::new();
        self.read_with(query, cache, &mut refreshing)
    }

    fn read_with(
        &mut self,
        query: &Query,
        cache: &mut EntityInstanceCache,
        refreshing: &mut HashSet<InstanceId>,
    ) -> Result<Vec<Instance>> {
        let (sql, params) = self.generator.generate(query)?;
        let rows = self.run_query(&sql, params.as_slice())?;
        let projection = query
            .projection()
            .unwrap_or_else(|| query.relation().entity());

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            instances.push(self.hydrate(projection, row, query.flags(), cache, refreshing)?);
        }
        tracing::debug!(
            entity = projection.class_name(),
            rows = rows.len(),
            "Hydrated read"
        );
        Ok(instances)
    }

    fn hydrate(
        &mut self,
        metadata: &'static EntityMetadata,
        row: &Row,
        flags: QueryFlags,
        cache: &mut EntityInstanceCache,
        refreshing: &mut HashSet<InstanceId>,
    ) -> Result<Instance> {
        let Some(id_mapping) = metadata.object_id_mapping() else {
            let instance = metadata.construct();
            self.fill(&instance, row, flags, cache, refreshing)?;
            return Ok(instance);
        };
        let id = column_value(row, id_mapping)?;

        if let Some(cached) = cache.get(metadata, &id) {
            if cache.is_pending(&cached) {
                return Ok(cached);
            }
            if flags.contains(QueryFlags::OVERWRITE_CACHED_INSTANCES) {
                if refreshing.insert(cached.id()) {
                    self.fill(&cached, row, flags, cache, refreshing)?;
                    cache.mark_unmodified(&cached)?;
                    tracing::debug!(entity = %cached.describe(), "Refreshed cached instance");
                }
                return Ok(cached);
            }
            if cache.is_modified(&cached) {
                return Err(unsaved_changes(&cached));
            }
            return Ok(cached);
        }

        let instance = metadata.construct();
        instance.set(id_mapping, PropertyValue::Value(id))?;
        cache.insert(&instance)?;
        refreshing.insert(instance.id());
        match self.fill(&instance, row, flags, cache, refreshing) {
            Ok(()) => {
                cache.finalize(&instance)?;
                Ok(instance)
            }
            Err(e) => {
                cache.take(&instance);
                Err(e)
            }
        }
    }

    fn fill(
        &mut self,
        instance: &Instance,
        row: &Row,
        flags: QueryFlags,
        cache: &mut EntityInstanceCache,
        refreshing: &mut HashSet<InstanceId>,
    ) -> Result<()> {
        let metadata = instance.metadata();
        for mapping in metadata.property_mappings() {
            match mapping.reference_kind() {
                Some(ReferenceKind::ToMany) => {
                    let members = self.read_collection(instance, mapping, flags, cache, refreshing)?;
                    instance.set(mapping, PropertyValue::Collection(members))?;
                }
                _ if mapping.is_transient() || mapping.is_object_id() => {}
                Some(ReferenceKind::ToOne) => {
                    let key = column_value(row, mapping)?;
                    let target = self.resolve_reference(mapping, key, flags, cache, refreshing)?;
                    instance.set(mapping, PropertyValue::Reference(target))?;
                }
                None => {
                    let value = column_value(row, mapping)?;
                    instance.set(mapping, PropertyValue::Value(value))?;
                }
            }
        }
        Ok(())
    }

    fn read_collection(
        &mut self,
        owner: &Instance,
        mapping: &PropertyMapping,
        flags: QueryFlags,
        cache: &mut EntityInstanceCache,
        refreshing: &mut HashSet<InstanceId>,
    ) -> Result<Vec<Instance>> {
        let (Some(target), Some(back_reference)) =
            (mapping.referenced_entity(), mapping.back_reference_mapping())
        else {
            return Err(Error::Custom(format!(
                "{}.{} has no resolvable back reference",
                owner.metadata().class_name(),
                mapping.class_property_name()
            )));
        };
        let query = Query::read(target)
            .with_filter(Filter::eq(
                back_reference,
                FilterValue::Instance(Some(owner.clone())),
            ))
            .with_flags(flags);
        self.read_with(&query, cache, refreshing)
    }

    fn resolve_reference(
        &mut self,
        mapping: &PropertyMapping,
        key: Value,
        flags: QueryFlags,
        cache: &mut EntityInstanceCache,
        refreshing: &mut HashSet<InstanceId>,
    ) -> Result<Option<Instance>> {
        if key.is_null() {
            return Ok(None);
        }
        let Some(target) = mapping.referenced_entity() else {
            return Ok(None);
        };
        if let Some(cached) = cache.get(target, &key) {
            if !flags.contains(QueryFlags::OVERWRITE_CACHED_INSTANCES) && cache.is_modified(&cached) {
                return Err(unsaved_changes(&cached));
            }
            return Ok(Some(cached));
        }

        let id_mapping = target.object_id_mapping().ok_or_else(|| {
            Error::Custom(format!("{} has no object id mapping", target.class_name()))
        })?;
        let query = Query::read(target)
            .with_filter(Filter::eq(id_mapping, FilterValue::Value(key.clone())))
            .with_flags(flags);
        let mut found = self.read_with(&query, cache, refreshing)?;
        if found.len() != 1 {
            return Err(Error::entity(
                target.class_name(),
                format!(
                    "Reference {}({}) resolved to {} rows, expected exactly one",
                    target.class_name(),
                    key,
                    found.len()
                ),
            ));
        }
        Ok(found.pop())
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Run an INSERT or UPDATE for the query's instance.
    ///
    /// Exactly one row must be affected. Returns the backend's generated id.
    pub fn merge(&mut self, query: &Query) -> Result<Option<Value>> {
        let (sql, params) = self.generator.generate(query)?;
        let returns_key =
            query.operation() == Operation::Create && sql.contains(" RETURNING ");
        let (rows_affected, last_insert_id) = if returns_key {
            let rows = self.run_query(&sql, params.as_slice())?;
            let id = rows.first().and_then(|row| row.get(0)).cloned();
            (rows.len() as u64, id)
        } else {
            let outcome = self.run_execute(&sql, params.as_slice())?;
            (outcome.rows_affected, outcome.last_insert_id)
        };

        if rows_affected != 1 {
            let entity = query.relation().entity().class_name();
            return Err(Error::entity(
                entity,
                format!(
                    "Unexpected number of rows affected: {} (expected 1)",
                    rows_affected
                ),
            ));
        }
        Ok(last_insert_id)
    }

    /// Run a DELETE and return the number of removed rows.
    pub fn remove(&mut self, query: &Query) -> Result<u64> {
        let (sql, params) = self.generator.generate(query)?;
        let outcome = self.run_execute(&sql, params.as_slice())?;
        Ok(outcome.rows_affected)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction level. Only the outermost level reaches the backend.
    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction_depth == 0 {
            self.log_statement("BEGIN", &[]);
            self.backend.begin()?;
        }
        self.transaction_depth += 1;
        tracing::trace!(depth = self.transaction_depth, "Began transaction level");
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        match self.transaction_depth {
            0 => return Err(Error::TransactionNotActive),
            1 => {
                self.log_statement("COMMIT", &[]);
                self.backend.commit()?;
            }
            _ => {}
        }
        self.transaction_depth -= 1;
        tracing::trace!(depth = self.transaction_depth, "Committed transaction level");
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        match self.transaction_depth {
            0 => return Err(Error::TransactionNotActive),
            1 => {
                self.log_statement("ROLLBACK", &[]);
                self.backend.rollback()?;
                tracing::warn!("Rolled back transaction");
            }
            _ => {}
        }
        self.transaction_depth -= 1;
        Ok(())
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    // ========================================================================
    // Statement execution
    // ========================================================================

    fn log_statement(&self, sql: &str, params: &[(String, Value)]) {
        if self.configuration.verbose {
            tracing::info!(sql = %sql, "Executing");
            if !params.is_empty() {
                tracing::info!(params = ?params, "Bound parameters");
            }
        }
    }

    pub(crate) fn run_query(&mut self, sql: &str, params: &[(String, Value)]) -> Result<Vec<Row>> {
        self.log_statement(sql, params);
        self.backend.query(sql, params).map_err(|e| {
            tracing::warn!(sql = %sql, error = %e, "Query failed");
            e.with_sql(sql)
        })
    }

    pub(crate) fn run_execute(
        &mut self,
        sql: &str,
        params: &[(String, Value)],
    ) -> Result<tabula_core::ExecuteOutcome> {
        self.log_statement(sql, params);
        self.backend.execute(sql, params).map_err(|e| {
            tracing::warn!(sql = %sql, error = %e, "Statement failed");
            e.with_sql(sql)
        })
    }
}
