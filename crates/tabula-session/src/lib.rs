//! Sessions, providers and the entity instance cache for Tabula.
//!
//! `tabula-session` is the **persistence layer**. It ties together:
//!
//! - **Identity map**: [`EntityInstanceCache`] keeps one live instance per row.
//! - **Provider**: [`Provider`] runs queries on a backend, hydrates cyclic entity
//!   graphs and keeps the schema in sync with entity metadata.
//! - **Session**: [`Session`] merges and removes instances, scopes transactions with
//!   [`TransactionToken`] and reconciles cached instances after a rollback.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::with_backend(backend, ProviderConfiguration::new("app.db"));
//!
//! let province = entity(Province { name: "Agder".into(), ..Default::default() });
//! let town = entity(Town { name: "Arendal".into(), province: Some(province.clone()), ..Default::default() });
//!
//! // Inserts the province first, then the town.
//! session.merge(&town)?;
//!
//! // Same instance back from the identity map.
//! let again = session.read_by_id::<Town>(town.read().id)?.unwrap();
//! assert!(Arc::ptr_eq(&again, &town));
//! ```

pub mod identity_map;
pub mod provider;
pub mod schema_sync;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use identity_map::{CacheKey, EntityInstanceCache};
pub use provider::{Provider, QueryOutput};
pub use schema_sync::SchemaState;
pub use transaction::{TransactionAction, TransactionPropagation, TransactionToken};

use std::collections::HashSet;
use tabula_core::{
    Entity, EntityRef, Error, ErrorKind, Instance, InstanceId, PropertyValue,
    ProviderConfiguration, ReferenceKind, Result, SqlBackend, Value,
};
use tabula_query::{Filter, FilterValue, Operation, Query, QueryFlags};

/// What a tracked instance went through inside the active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedOperation {
    Merge,
    Delete,
}

/// An instance written inside the active session transaction.
#[derive(Debug, Clone)]
pub struct TrackedInstance {
    pub instance: Instance,
    pub operation: TrackedOperation,
}

/// Every element of a to-many collection must point back at its owner.
///
/// # Panics
///
/// Panics when a member's back-reference names another owner or none.
fn check_cross_references(instance: &Instance) -> Result<()> {
    for mapping in instance.metadata().property_mappings() {
        if mapping.reference_kind() != Some(ReferenceKind::ToMany) {
            continue;
        }
        let Some(back_reference) = mapping.back_reference_mapping() else {
            continue;
        };
        let PropertyValue::Collection(members) = mapping.get(instance)? else {
            continue;
        };
        for member in &members {
            let points_back = match back_reference.get(member)? {
                PropertyValue::Reference(Some(owner)) => owner.ptr_eq(instance),
                _ => false,
            };
            assert!(
                points_back,
                "cross-reference inconsistency: {} is in {}.{} but its '{}' does not point back",
                member.describe(),
                instance.describe(),
                mapping.class_property_name(),
                back_reference.class_property_name()
            );
        }
    }
    Ok(())
}

/// Unit of work over one provider and its identity map.
pub struct Session<B: SqlBackend> {
    provider: Provider<B>,
    cache: EntityInstanceCache,
    transaction_depth: usize,
    tracked: Vec<TrackedInstance>,
    merging: HashSet<InstanceId>,
    last_error: Option<Error>,
}

impl<B: SqlBackend> Session<B> {
    pub fn new(provider: Provider<B>) -> Self {
        Self {
            provider,
            cache: EntityInstanceCache::new(),
            transaction_depth: 0,
            tracked: Vec::new(),
            merging: HashSet::new(),
            last_error: None,
        }
    }

    /// Build a session over a fresh provider for `backend`.
    pub fn with_backend(backend: B, configuration: ProviderConfiguration) -> Self {
        Self::new(Provider::new(backend, configuration))
    }

    pub fn provider(&self) -> &Provider<B> {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut Provider<B> {
        &mut self.provider
    }

    pub fn cache(&self) -> &EntityInstanceCache {
        &self.cache
    }

    /// Error of the most recent failed operation, cleared when an operation starts.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn last_error_kind(&self) -> ErrorKind {
        self.last_error.as_ref().map_or(ErrorKind::None, Error::kind)
    }

    /// Instances written in the active transaction, oldest first.
    pub fn tracked_instances(&self) -> &[TrackedInstance] {
        &self.tracked
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::debug!(kind = ?e.kind(), error = %e, "Session operation failed");
            self.last_error = Some(e.clone());
        }
        result
    }

    pub fn connect(&mut self) -> Result<()> {
        let result = self.provider.connect();
        self.record(result)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.transaction_depth = 0;
        self.tracked.clear();
        let result = self.provider.disconnect();
        self.record(result)
    }

    pub fn is_connected(&self) -> bool {
        self.provider.is_connected()
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.provider.is_connected() {
            Ok(())
        } else {
            self.provider.connect()
        }
    }

    /// Run `query` through the provider against this session's cache.
    ///
    /// A Merge query resolves through [`Session::merge_instance`] and yields the
    /// merged instance.
    #[tracing::instrument(level = "debug", skip(self, query), fields(operation = ?query.operation()))]
    pub fn execute(&mut self, query: &Query) -> Result<QueryOutput> {
        self.last_error = None;
        if query.operation() == Operation::Merge {
            if let Some(instance) = query.entity_instance() {
                let instance = instance.clone();
                return self
                    .merge_instance(&instance)
                    .map(|()| QueryOutput::Entities(vec![instance]));
            }
        }
        let result = match self.ensure_connected() {
            Ok(()) => self.provider.execute(query, &mut self.cache),
            Err(e) => Err(e),
        };
        self.record(result)
    }

    /// Read every `T` matching `filter`.
    pub fn read<T: Entity>(&mut self, filter: Option<Filter>) -> Result<Vec<EntityRef<T>>> {
        let mut query = Query::read(T::metadata());
        if let Some(filter) = filter {
            query = query.with_filter(filter);
        }
        let instances = self.execute(&query)?.into_entities();
        instances.iter().map(Instance::try_downcast::<T>).collect()
    }

    /// Read the `T` whose object id is `id`.
    pub fn read_by_id<T: Entity>(&mut self, id: impl Into<Value>) -> Result<Option<EntityRef<T>>> {
        let metadata = T::metadata();
        let Some(id_mapping) = metadata.object_id_mapping() else {
            let error = Error::Custom(format!(
                "{} has no object id mapping",
                metadata.class_name()
            ));
            return self.record(Err(error));
        };
        let filter = Filter::eq(id_mapping, FilterValue::Value(id.into()));
        Ok(self.read::<T>(Some(filter))?.into_iter().next())
    }

    pub fn merge<T: Entity>(&mut self, entity: &EntityRef<T>) -> Result<()> {
        self.merge_instance(&Instance::from_ref(entity))
    }

    pub fn remove<T: Entity>(&mut self, entity: &EntityRef<T>) -> Result<()> {
        self.remove_instance(&Instance::from_ref(entity))
    }

    // ========================================================================
    // Merge / remove
    // ========================================================================

    /// Insert or update `instance`, merging unsaved to-one references first.
    ///
    /// Cached instances without changes are left alone. Everything runs in one
    /// transaction scope, rolled back on failure.
    ///
    /// # Panics
    ///
    /// Panics when a to-many collection holds an element whose back-reference does
    /// not point at `instance`.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(entity = %instance.describe()))]
    pub fn merge_instance(&mut self, instance: &Instance) -> Result<()> {
        if self.merging.contains(&instance.id()) {
            return Ok(());
        }
        self.last_error = None;
        if let Err(e) = self.ensure_connected() {
            return self.record(Err(e));
        }

        let mut token =
            self.declare_transaction(TransactionPropagation::Require, TransactionAction::Rollback);
        let result = match token.merge_in_scope(instance) {
            Ok(()) => token.commit(),
            Err(e) => Err(e),
        };
        drop(token);
        self.record(result)
    }

    fn merge_in_scope(&mut self, instance: &Instance) -> Result<()> {
        let cached = self.cache.contains(instance);
        if cached && !self.cache.is_modified(instance) {
            tracing::debug!(entity = %instance.describe(), "Instance unchanged; nothing to merge");
            return Ok(());
        }
        check_cross_references(instance)?;

        self.merging.insert(instance.id());
        let result = self.write_instance(instance, cached);
        self.merging.remove(&instance.id());
        result
    }

    fn needs_merge(&self, target: &Instance) -> bool {
        !self.merging.contains(&target.id())
            && (!self.cache.contains(target) || self.cache.is_modified(target))
    }

    fn write_instance(&mut self, instance: &Instance, cached: bool) -> Result<()> {
        let metadata = instance.metadata();
        for mapping in metadata.property_mappings() {
            if mapping.is_transient() || mapping.reference_kind() != Some(ReferenceKind::ToOne) {
                continue;
            }
            if let PropertyValue::Reference(Some(target)) = mapping.get(instance)? {
                if self.needs_merge(&target) {
                    self.merge_instance(&target)?;
                }
            }
        }

        let query = if cached {
            Query::update(instance.clone())
        } else {
            Query::create(instance.clone())
        };
        let output = self.provider.execute(&query, &mut self.cache)?;

        if cached {
            self.cache.mark_unmodified(instance)?;
        } else {
            let autogenerated = metadata
                .object_id_mapping()
                .is_some_and(|m| m.is_autogenerated());
            if let (true, QueryOutput::InsertedId(Some(id))) = (autogenerated, output) {
                instance.set_object_id(id)?;
            }
            self.cache.insert(instance)?;
            self.cache.finalize(instance)?;
        }
        tracing::debug!(
            entity = %instance.describe(),
            operation = if cached { "update" } else { "create" },
            "Merged instance"
        );
        self.track(instance, TrackedOperation::Merge);
        Ok(())
    }

    /// Delete `instance` and evict it from the cache.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(entity = %instance.describe()))]
    pub fn remove_instance(&mut self, instance: &Instance) -> Result<()> {
        self.last_error = None;
        let result = self.remove_in_scope(instance);
        self.record(result)
    }

    fn remove_in_scope(&mut self, instance: &Instance) -> Result<()> {
        self.ensure_connected()?;
        let output = self
            .provider
            .execute(&Query::delete(instance.clone()), &mut self.cache)?;
        if let QueryOutput::RowsAffected(rows) = output {
            tracing::debug!(entity = %instance.describe(), rows, "Removed instance");
        }
        self.cache.take(instance);
        self.track(instance, TrackedOperation::Delete);
        Ok(())
    }

    fn track(&mut self, instance: &Instance, operation: TrackedOperation) {
        if self.in_transaction() {
            self.tracked.push(TrackedInstance {
                instance: instance.clone(),
                operation,
            });
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction scope according to `propagation`.
    ///
    /// # Panics
    ///
    /// Panics when `Require` cannot begin a transaction, or when `DontSupport` is
    /// declared inside one.
    pub fn declare_transaction(
        &mut self,
        propagation: TransactionPropagation,
        final_action: TransactionAction,
    ) -> TransactionToken<'_, B> {
        let engaged = match propagation {
            TransactionPropagation::Require if !self.in_transaction() => {
                if let Err(e) = self.begin_transaction() {
                    panic!("required transaction could not begin: {}", e);
                }
                true
            }
            TransactionPropagation::Require | TransactionPropagation::Support => false,
            TransactionPropagation::DontSupport => {
                assert!(
                    !self.in_transaction(),
                    "transaction scope declared DontSupport inside an active transaction"
                );
                false
            }
        };
        TransactionToken::new(self, propagation, final_action, engaged)
    }

    /// Open a transaction level. Only the outermost level reaches the provider.
    pub fn begin_transaction(&mut self) -> Result<()> {
        let result = self.begin_level();
        self.record(result)
    }

    fn begin_level(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if self.transaction_depth == 0 {
            self.provider.begin_transaction()?;
        }
        self.transaction_depth += 1;
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        let result = self.commit_level();
        self.record(result)
    }

    fn commit_level(&mut self) -> Result<()> {
        match self.transaction_depth {
            0 => Err(Error::TransactionNotActive),
            1 => {
                self.provider.commit_transaction()?;
                self.transaction_depth = 0;
                let committed = std::mem::take(&mut self.tracked);
                tracing::debug!(tracked = committed.len(), "Committed session transaction");
                Ok(())
            }
            _ => {
                self.transaction_depth -= 1;
                Ok(())
            }
        }
    }

    /// Roll back a transaction level. At the outermost level every tracked instance
    /// is re-read from the backend.
    ///
    /// # Panics
    ///
    /// Panics when a tracked instance cannot be re-read.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let result = self.rollback_level();
        self.record(result)
    }

    fn rollback_level(&mut self) -> Result<()> {
        match self.transaction_depth {
            0 => Err(Error::TransactionNotActive),
            1 => {
                self.provider.rollback_transaction()?;
                self.transaction_depth = 0;
                let tracked = std::mem::take(&mut self.tracked);
                self.reconcile(&tracked);
                Ok(())
            }
            _ => {
                self.transaction_depth -= 1;
                Ok(())
            }
        }
    }

    /// Bring tracked instances back in line with the rolled-back database.
    fn reconcile(&mut self, tracked: &[TrackedInstance]) {
        let mut seen = HashSet::new();
        for entry in tracked {
            let instance = &entry.instance;
            if !seen.insert(instance.id()) {
                continue;
            }
            let metadata = instance.metadata();
            let (Some(id_mapping), Ok(Some(id))) = (metadata.object_id_mapping(), instance.object_id())
            else {
                continue;
            };

            if !self.cache.contains(instance) {
                if let Some(other) = self.cache.get(metadata, &id) {
                    tracing::warn!(
                        entity = %instance.describe(),
                        cached = ?other,
                        "Another instance took this id; not restoring"
                    );
                    continue;
                }
                let restored = self
                    .cache
                    .insert(instance)
                    .and_then(|()| self.cache.finalize(instance));
                if let Err(e) = restored {
                    panic!("failed to restore {} after rollback: {}", instance.describe(), e);
                }
            }

            let query = Query::read(metadata)
                .with_filter(Filter::eq(id_mapping, FilterValue::Value(id)))
                .with_flags(QueryFlags::OVERWRITE_CACHED_INSTANCES);
            match self.provider.read(&query, &mut self.cache) {
                Ok(found) if found.is_empty() => {
                    self.cache.take(instance);
                }
                Ok(_) => {}
                Err(e) => panic!("failed to re-read {} after rollback: {}", instance.describe(), e),
            }
            tracing::debug!(
                entity = %instance.describe(),
                operation = ?entry.operation,
                "Reconciled after rollback"
            );
        }
    }
}

impl<B: SqlBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.provider.is_connected() {
            if let Err(e) = self.provider.disconnect() {
                tracing::warn!(error = %e, "Failed to disconnect session");
            }
        }
    }
}
