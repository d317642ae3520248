//! Entity types and shared instance handles.

use crate::Result;
use crate::error::Error;
use crate::metadata::{EntityMetadata, PropertyMapping, PropertyValue};
use crate::value::Value;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type mapped to a table.
///
/// Implementors expose their metadata from a process-wide static, usually a
/// `LazyLock<EntityMetadata>` built with [`EntityMetadata::builder`].
pub trait Entity: Sized + Send + Sync + 'static {
    fn metadata() -> &'static EntityMetadata;
}

/// Shared, mutable handle to a typed entity instance.
///
/// Entity graphs are built out of these: a to-one reference is an
/// `Option<EntityRef<T>>`, a to-many collection a `Vec<EntityRef<T>>`.
pub type EntityRef<T> = Arc<RwLock<T>>;

/// Wrap a value into a new [`EntityRef`].
pub fn entity<T: Entity>(value: T) -> EntityRef<T> {
    Arc::new(RwLock::new(value))
}

/// Identity of a live instance, stable for as long as any handle to it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

/// Type-erased handle to a live entity instance.
///
/// Clones share the same underlying object; [`Instance::id`] identifies it.
#[derive(Clone)]
pub struct Instance {
    metadata: &'static EntityMetadata,
    handle: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    /// Allocate a new instance holding `value`.
    pub fn new<T: Entity>(value: T) -> Self {
        Self::from_ref(&entity(value))
    }

    /// Erase a typed handle. The result shares identity with `entity`.
    pub fn from_ref<T: Entity>(entity: &EntityRef<T>) -> Self {
        let handle: Arc<dyn Any + Send + Sync> = Arc::clone(entity) as Arc<dyn Any + Send + Sync>;
        Self {
            metadata: T::metadata(),
            handle,
        }
    }

    pub fn metadata(&self) -> &'static EntityMetadata {
        self.metadata
    }

    pub fn id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.handle).cast::<()>() as usize)
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.id() == other.id()
    }

    /// Recover the typed handle, if this instance is a `T`.
    pub fn downcast<T: Entity>(&self) -> Option<EntityRef<T>> {
        Arc::clone(&self.handle).downcast::<RwLock<T>>().ok()
    }

    /// Like [`Instance::downcast`], reporting a mismatch as an error.
    pub fn try_downcast<T: Entity>(&self) -> Result<EntityRef<T>> {
        self.downcast::<T>().ok_or_else(|| {
            Error::Custom(format!(
                "instance of {} is not a {}",
                self.metadata.class_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn get(&self, mapping: &PropertyMapping) -> Result<PropertyValue> {
        mapping.get(self)
    }

    pub fn set(&self, mapping: &PropertyMapping, value: PropertyValue) -> Result<()> {
        mapping.set(self, value)
    }

    /// Current object id, or `None` when the entity has no object-id mapping.
    pub fn object_id(&self) -> Result<Option<Value>> {
        match self.metadata.object_id_mapping() {
            Some(mapping) => mapping.get(self).map(PropertyValue::into_value),
            None => Ok(None),
        }
    }

    pub fn set_object_id(&self, id: Value) -> Result<()> {
        let mapping = self.metadata.object_id_mapping().ok_or_else(|| {
            Error::Custom(format!(
                "{} has no object id mapping",
                self.metadata.class_name()
            ))
        })?;
        mapping.set(self, PropertyValue::Value(id))
    }

    /// Short `Class(id)` description used in log lines and error messages.
    pub fn describe(&self) -> String {
        match self.object_id() {
            Ok(Some(id)) => format!("{}({})", self.metadata.class_name(), id),
            _ => format!("{}(<no id>)", self.metadata.class_name()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.metadata.class_name())
            .field("id", &self.id())
            .finish()
    }
}
