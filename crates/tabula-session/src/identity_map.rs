//! The entity instance cache: one live instance per (entity type, object id).
//!
//! Instances enter the cache in two phases. [`EntityInstanceCache::insert`] registers
//! a *pending* instance as soon as its object id is known, so references that cycle
//! back to it during hydration resolve to the same object. [`EntityInstanceCache::finalize`]
//! completes it and takes a snapshot of its mapped values.
//!
//! Modification detection compares current values against that snapshot. A to-one
//! reference compares by referenced instance identity, never by value. Pending
//! instances never report modified.

use std::any::TypeId;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tabula_core::{
    EntityMetadata, Error, Instance, InstanceId, PropertyMapping, PropertyValue, ReferenceKind,
    Result, Value,
};

/// Key of a cache entry: the entity type plus its normalized object id.
#[derive(Debug, Clone)]
pub struct CacheKey {
    type_id: TypeId,
    id: Value,
}

impl CacheKey {
    /// Key for `id` of the entity described by `metadata`.
    pub fn new(metadata: &EntityMetadata, id: &Value) -> Self {
        Self {
            type_id: metadata.type_id(),
            id: id.normalized(),
        }
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

// Floats compare by bit pattern so that every key equals itself.
impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
            && match (&self.id, &other.id) {
                (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
                (Value::Json(a), Value::Json(b)) => a.to_string() == b.to_string(),
                (a, b) => a == b,
            }
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        hash_value(&self.id, state);
    }
}

fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    match v {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::TinyInt(i) => {
            2u8.hash(state);
            i.hash(state);
        }
        Value::SmallInt(i) => {
            3u8.hash(state);
            i.hash(state);
        }
        Value::Int(i) => {
            4u8.hash(state);
            i.hash(state);
        }
        Value::BigInt(i) => {
            5u8.hash(state);
            i.hash(state);
        }
        Value::Float(f) => {
            6u8.hash(state);
            f.to_bits().hash(state);
        }
        Value::Double(f) => {
            7u8.hash(state);
            f.to_bits().hash(state);
        }
        Value::Text(s) => {
            8u8.hash(state);
            s.hash(state);
        }
        Value::Bytes(b) => {
            9u8.hash(state);
            b.hash(state);
        }
        Value::Date(d) => {
            10u8.hash(state);
            d.hash(state);
        }
        Value::Time(t) => {
            11u8.hash(state);
            t.hash(state);
        }
        Value::Timestamp(ts) => {
            12u8.hash(state);
            ts.hash(state);
        }
        Value::Json(j) => {
            13u8.hash(state);
            j.to_string().hash(state);
        }
    }
}

/// Captured value of one mapped property.
#[derive(Debug, Clone, PartialEq)]
enum SnapshotValue {
    Value(Value),
    Reference(Option<InstanceId>),
}

/// Mapped values of an instance at finalize / mark-unmodified time.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot(Vec<SnapshotValue>);

fn tracked_mappings(metadata: &EntityMetadata) -> impl Iterator<Item = &PropertyMapping> {
    metadata
        .property_mappings()
        .iter()
        .filter(|m| !m.is_transient() && m.reference_kind() != Some(ReferenceKind::ToMany))
}

fn snapshot(instance: &Instance) -> Result<Snapshot> {
    let mut values = Vec::new();
    for mapping in tracked_mappings(instance.metadata()) {
        let value = match mapping.get(instance)? {
            PropertyValue::Value(v) => SnapshotValue::Value(v),
            PropertyValue::Reference(target) => {
                SnapshotValue::Reference(target.as_ref().map(Instance::id))
            }
            PropertyValue::Collection(_) => continue,
        };
        values.push(value);
    }
    Ok(Snapshot(values))
}

#[derive(Debug)]
enum EntryState {
    /// Registered, hydration still in progress
    Pending,
    Finalized(Snapshot),
}

#[derive(Debug)]
struct CacheEntry {
    instance: Instance,
    state: EntryState,
}

/// Identity map from (entity type, object id) to the live instance.
#[derive(Debug, Default)]
pub struct EntityInstanceCache {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Reverse index, so an instance whose id changed can still be found
    keys: HashMap<InstanceId, CacheKey>,
}

impl EntityInstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance of `metadata` with object id `id`.
    pub fn get(&self, metadata: &EntityMetadata, id: &Value) -> Option<Instance> {
        self.entries
            .get(&CacheKey::new(metadata, id))
            .map(|entry| entry.instance.clone())
    }

    /// Register `instance` as pending under its current object id.
    ///
    /// Re-inserting the same instance resets it to pending.
    ///
    /// # Panics
    ///
    /// Panics when a different live instance is already cached under the same key.
    pub fn insert(&mut self, instance: &Instance) -> Result<()> {
        let id = instance.object_id()?.ok_or_else(|| {
            Error::Custom(format!(
                "{} has no object id and cannot be cached",
                instance.metadata().class_name()
            ))
        })?;
        let key = CacheKey::new(instance.metadata(), &id);

        if let Some(existing) = self.entries.get(&key) {
            assert!(
                existing.instance.ptr_eq(instance),
                "duplicate instance registration for {}: another live instance is already cached",
                instance.describe()
            );
        }
        tracing::debug!(
            entity = %instance.describe(),
            id = %key.id(),
            "Registered pending instance"
        );
        if let Some(previous) = self.keys.insert(instance.id(), key.clone()) {
            if previous != key {
                self.entries.remove(&previous);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                instance: instance.clone(),
                state: EntryState::Pending,
            },
        );
        Ok(())
    }

    /// Mark hydration of `instance` complete and snapshot its values.
    pub fn finalize(&mut self, instance: &Instance) -> Result<()> {
        let snapshot = snapshot(instance)?;
        let entry = self.entry_mut(instance)?;
        entry.state = EntryState::Finalized(snapshot);
        tracing::trace!(entity = %instance.describe(), "Finalized instance");
        Ok(())
    }

    /// Whether the values of `instance` differ from its snapshot.
    ///
    /// Instances that are not cached, or still pending, are never modified. An
    /// accessor failure counts as modified.
    pub fn is_modified(&self, instance: &Instance) -> bool {
        let Some(entry) = self.entry(instance) else {
            return false;
        };
        let EntryState::Finalized(original) = &entry.state else {
            return false;
        };
        let modified = match snapshot(instance) {
            Ok(current) => current != *original,
            Err(e) => {
                tracing::trace!(entity = %instance.describe(), error = %e, "Snapshot failed");
                true
            }
        };
        tracing::trace!(entity = %instance.describe(), modified, "Modification check");
        modified
    }

    /// Take a fresh snapshot of a finalized instance. Pending entries are left alone.
    pub fn mark_unmodified(&mut self, instance: &Instance) -> Result<()> {
        let snapshot = snapshot(instance)?;
        let entry = self.entry_mut(instance)?;
        if matches!(entry.state, EntryState::Finalized(_)) {
            entry.state = EntryState::Finalized(snapshot);
        }
        Ok(())
    }

    pub fn contains(&self, instance: &Instance) -> bool {
        self.entry(instance).is_some()
    }

    pub fn is_pending(&self, instance: &Instance) -> bool {
        self.entry(instance)
            .is_some_and(|e| matches!(e.state, EntryState::Pending))
    }

    /// Evict `instance`, returning the handle the cache held.
    pub fn take(&mut self, instance: &Instance) -> Option<Instance> {
        let key = self.keys.remove(&instance.id())?;
        let entry = self.entries.remove(&key)?;
        tracing::debug!(entity = %instance.describe(), "Evicted instance");
        Some(entry.instance)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }

    /// Every cached instance, in no particular order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.entries.values().map(|e| &e.instance)
    }

    fn entry(&self, instance: &Instance) -> Option<&CacheEntry> {
        let key = self.keys.get(&instance.id())?;
        self.entries.get(key)
    }

    fn entry_mut(&mut self, instance: &Instance) -> Result<&mut CacheEntry> {
        let key = self.keys.get(&instance.id()).ok_or_else(|| {
            Error::entity(
                instance.metadata().class_name(),
                format!("{} is not cached", instance.describe()),
            )
        })?;
        self.entries.get_mut(key).ok_or_else(|| {
            Error::entity(
                instance.metadata().class_name(),
                format!("{} is not cached", instance.describe()),
            )
        })
    }
}
