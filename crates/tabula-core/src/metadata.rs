//! Entity metadata: table names, property mappings and typed accessors.
//!
//! Metadata is declared once per entity type with [`EntityMetadata::builder`] and
//! lives for the rest of the process. Every [`PropertyMapping`] carries the closures
//! that read and write its property on a live [`Instance`], so nothing downstream
//! dispatches on property names at runtime.

use crate::Result;
use crate::entity::{Entity, EntityRef, Instance};
use crate::error::{Error, TypeError};
use crate::identifiers::is_valid_identifier;
use crate::types::{SqlType, TypeInfo};
use crate::value::Value;
use std::any::TypeId;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// User metadata key holding a per-entity schema mode override.
pub const SCHEMA_MODE_KEY: &str = "schema";

type Getter = Arc<dyn Fn(&Instance) -> Result<PropertyValue> + Send + Sync>;
type Setter = Arc<dyn Fn(&Instance, PropertyValue) -> Result<()> + Send + Sync>;

/// Value read from or written to a mapped property.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// A plain column value
    Value(Value),
    /// A to-one reference
    Reference(Option<Instance>),
    /// A to-many collection
    Collection(Vec<Instance>),
}

impl PropertyValue {
    /// Flatten into a column value; references collapse to NULL.
    pub fn into_value(self) -> Option<Value> {
        match self {
            PropertyValue::Value(v) => Some(v),
            PropertyValue::Reference(_) | PropertyValue::Collection(_) => None,
        }
    }
}

/// Association shape of a reference mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Stored as a foreign-key column
    ToOne,
    /// Computed from the target's back-reference, never stored
    ToMany,
}

#[derive(Clone, Copy)]
struct ReferenceTarget {
    kind: ReferenceKind,
    target: fn() -> &'static EntityMetadata,
    back_reference: Option<&'static str>,
}

/// One property-to-column correspondence.
#[derive(Clone)]
pub struct PropertyMapping {
    class_property_name: &'static str,
    table_field_name: Option<String>,
    data_type: SqlType,
    object_id: bool,
    autogenerated: bool,
    transient: bool,
    reference: Option<ReferenceTarget>,
    getter: Getter,
    setter: Setter,
}

fn type_mismatch(expected: &'static str, property: &str, found: &PropertyValue) -> Error {
    let actual = match found {
        PropertyValue::Value(v) => v.type_name().to_string(),
        PropertyValue::Reference(_) => "reference".to_string(),
        PropertyValue::Collection(_) => "collection".to_string(),
    };
    Error::Type(TypeError {
        expected,
        actual,
        column: Some(property.to_string()),
    })
}

impl PropertyMapping {
    /// Map a plain value property.
    ///
    /// The data type comes from `T`'s [`TypeInfo`]; override it with
    /// [`PropertyMapping::sql_type`]. A NULL column sets `T::default()` unless `T`
    /// itself accepts NULL.
    pub fn column<E, T, G, S>(property: &'static str, get: G, set: S) -> Self
    where
        E: Entity,
        T: TypeInfo + Default + Into<Value> + TryFrom<Value, Error = Error> + 'static,
        G: Fn(&E) -> T + Send + Sync + 'static,
        S: Fn(&mut E, T) + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |instance: &Instance| {
            let entity = instance.try_downcast::<E>()?;
            let value = get(&entity.read());
            Ok(PropertyValue::Value(value.into()))
        });
        let setter: Setter = Arc::new(move |instance: &Instance, value: PropertyValue| {
            let PropertyValue::Value(value) = value else {
                return Err(type_mismatch("value", property, &value));
            };
            let null = value.is_null();
            let converted = match T::try_from(value) {
                Ok(converted) => converted,
                Err(Error::Type(_)) if null => T::default(),
                Err(Error::Type(mut te)) => {
                    te.column = Some(property.to_string());
                    return Err(Error::Type(te));
                }
                Err(e) => return Err(e),
            };
            let entity = instance.try_downcast::<E>()?;
            set(&mut entity.write(), converted);
            Ok(())
        });
        Self {
            class_property_name: property,
            table_field_name: Some(property.to_string()),
            data_type: T::SQL_TYPE,
            object_id: false,
            autogenerated: false,
            transient: false,
            reference: None,
            getter,
            setter,
        }
    }

    /// Map a to-one reference stored in a `<property>_id` foreign-key column.
    pub fn reference<E, R, G, S>(property: &'static str, get: G, set: S) -> Self
    where
        E: Entity,
        R: Entity,
        G: Fn(&E) -> Option<EntityRef<R>> + Send + Sync + 'static,
        S: Fn(&mut E, Option<EntityRef<R>>) + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |instance: &Instance| {
            let entity = instance.try_downcast::<E>()?;
            let referenced = get(&entity.read());
            Ok(PropertyValue::Reference(
                referenced.as_ref().map(Instance::from_ref),
            ))
        });
        let setter: Setter = Arc::new(move |instance: &Instance, value: PropertyValue| {
            let referenced = match value {
                PropertyValue::Reference(Some(target)) => Some(target.try_downcast::<R>()?),
                PropertyValue::Reference(None) | PropertyValue::Value(Value::Null) => None,
                other => return Err(type_mismatch("reference", property, &other)),
            };
            let entity = instance.try_downcast::<E>()?;
            set(&mut entity.write(), referenced);
            Ok(())
        });
        Self {
            class_property_name: property,
            table_field_name: Some(format!("{}_id", property)),
            data_type: SqlType::BigInt,
            object_id: false,
            autogenerated: false,
            transient: false,
            reference: Some(ReferenceTarget {
                kind: ReferenceKind::ToOne,
                target: R::metadata,
                back_reference: None,
            }),
            getter,
            setter,
        }
    }

    /// Map a to-many collection computed from `back_reference`, a to-one property
    /// on `R` that points back at the owning entity.
    pub fn collection<E, R, C, G, S>(
        property: &'static str,
        back_reference: &'static str,
        get: G,
        set: S,
    ) -> Self
    where
        E: Entity,
        R: Entity,
        C: FromIterator<EntityRef<R>>,
        G: Fn(&E) -> Vec<EntityRef<R>> + Send + Sync + 'static,
        S: Fn(&mut E, C) + Send + Sync + 'static,
    {
        let getter: Getter = Arc::new(move |instance: &Instance| {
            let entity = instance.try_downcast::<E>()?;
            let members = get(&entity.read());
            Ok(PropertyValue::Collection(
                members.iter().map(Instance::from_ref).collect(),
            ))
        });
        let setter: Setter = Arc::new(move |instance: &Instance, value: PropertyValue| {
            let PropertyValue::Collection(members) = value else {
                return Err(type_mismatch("collection", property, &value));
            };
            let typed = members
                .iter()
                .map(Instance::try_downcast::<R>)
                .collect::<Result<Vec<_>>>()?;
            let entity = instance.try_downcast::<E>()?;
            set(&mut entity.write(), typed.into_iter().collect());
            Ok(())
        });
        Self {
            class_property_name: property,
            table_field_name: None,
            data_type: SqlType::BigInt,
            object_id: false,
            autogenerated: false,
            transient: true,
            reference: Some(ReferenceTarget {
                kind: ReferenceKind::ToMany,
                target: R::metadata,
                back_reference: Some(back_reference),
            }),
            getter,
            setter,
        }
    }

    /// Mark as the object id (primary key).
    pub fn object_id(mut self) -> Self {
        self.object_id = true;
        self
    }

    /// Mark the value as generated by the backend on insert.
    pub fn autogenerated(mut self) -> Self {
        self.autogenerated = true;
        self
    }

    /// Exclude from persistence.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn column_name(mut self, name: impl Into<String>) -> Self {
        if self.reference_kind() != Some(ReferenceKind::ToMany) {
            self.table_field_name = Some(name.into());
        }
        self
    }

    pub fn sql_type(mut self, sql_type: SqlType) -> Self {
        self.data_type = sql_type;
        self
    }

    pub fn class_property_name(&self) -> &'static str {
        self.class_property_name
    }

    /// Column name, absent for to-many collections.
    pub fn table_field_name(&self) -> Option<&str> {
        self.table_field_name.as_deref()
    }

    /// Column name, falling back to the property name.
    pub fn field_name(&self) -> &str {
        self.table_field_name
            .as_deref()
            .unwrap_or(self.class_property_name)
    }

    /// Declared data type. A to-one reference takes the target's object-id type.
    pub fn data_type(&self) -> SqlType {
        match self.reference {
            Some(ReferenceTarget {
                kind: ReferenceKind::ToOne,
                target,
                ..
            }) => target()
                .object_id_mapping()
                .map_or_else(|| self.data_type.clone(), PropertyMapping::data_type),
            _ => self.data_type.clone(),
        }
    }

    pub fn is_object_id(&self) -> bool {
        self.object_id
    }

    pub fn is_autogenerated(&self) -> bool {
        self.autogenerated
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    pub fn reference_kind(&self) -> Option<ReferenceKind> {
        self.reference.map(|r| r.kind)
    }

    pub fn referenced_entity(&self) -> Option<&'static EntityMetadata> {
        self.reference.map(|r| (r.target)())
    }

    /// Name of the target's back-reference property for to-many collections.
    pub fn back_reference(&self) -> Option<&'static str> {
        self.reference.and_then(|r| r.back_reference)
    }

    /// Resolve the back-reference mapping on the target entity.
    pub fn back_reference_mapping(&self) -> Option<&'static PropertyMapping> {
        let target = self.referenced_entity()?;
        target
            .property(self.back_reference()?)
            .filter(|m| m.reference_kind() == Some(ReferenceKind::ToOne))
    }

    pub fn get(&self, instance: &Instance) -> Result<PropertyValue> {
        (self.getter)(instance)
    }

    pub fn set(&self, instance: &Instance, value: PropertyValue) -> Result<()> {
        (self.setter)(instance, value)
    }
}

impl fmt::Debug for PropertyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMapping")
            .field("property", &self.class_property_name)
            .field("column", &self.table_field_name)
            .field("data_type", &self.data_type)
            .field("object_id", &self.object_id)
            .field("autogenerated", &self.autogenerated)
            .field("transient", &self.transient)
            .field("reference", &self.reference.map(|r| r.kind))
            .finish()
    }
}

/// Describes one entity type.
pub struct EntityMetadata {
    class_name: &'static str,
    table_name: String,
    type_id: TypeId,
    constructor: fn() -> Instance,
    property_mappings: Vec<PropertyMapping>,
    object_id: Option<usize>,
    user_metadata: BTreeMap<String, String>,
}

fn construct<T: Entity + Default>() -> Instance {
    Instance::new(T::default())
}

impl EntityMetadata {
    /// Start declaring metadata for `T`. The table name defaults to `class_name`.
    pub fn builder<T: Entity + Default>(class_name: &'static str) -> EntityMetadataBuilder {
        EntityMetadataBuilder {
            class_name,
            table_name: None,
            type_id: TypeId::of::<T>(),
            constructor: construct::<T>,
            property_mappings: Vec::new(),
            user_metadata: BTreeMap::new(),
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn property_mappings(&self) -> &[PropertyMapping] {
        &self.property_mappings
    }

    pub fn object_id_mapping(&self) -> Option<&PropertyMapping> {
        self.object_id.map(|i| &self.property_mappings[i])
    }

    /// Look up a mapping by class property name.
    pub fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.property_mappings
            .iter()
            .find(|m| m.class_property_name == name)
    }

    /// Look up a mapping by column name.
    pub fn field(&self, column: &str) -> Option<&PropertyMapping> {
        self.property_mappings
            .iter()
            .find(|m| m.table_field_name.as_deref() == Some(column))
    }

    pub fn user_metadata(&self, key: &str) -> Option<&str> {
        self.user_metadata.get(key).map(String::as_str)
    }

    /// Allocate a default-initialized instance of this entity.
    pub fn construct(&self) -> Instance {
        (self.constructor)()
    }

    /// Whether `other` describes the same entity type.
    pub fn same_entity(&self, other: &EntityMetadata) -> bool {
        self.type_id == other.type_id
    }

    /// Check the references of this entity against their targets.
    ///
    /// Targets resolve lazily, so this runs after registration rather than at build
    /// time.
    pub fn validate_references(&self) -> Result<()> {
        for mapping in &self.property_mappings {
            if mapping.reference_kind() == Some(ReferenceKind::ToMany)
                && mapping.back_reference_mapping().is_none()
            {
                return Err(Error::Custom(format!(
                    "{}.{}: back reference '{}' is not a to-one reference on {}",
                    self.class_name,
                    mapping.class_property_name,
                    mapping.back_reference().unwrap_or_default(),
                    mapping
                        .referenced_entity()
                        .map_or("<unresolved>", EntityMetadata::class_name),
                )));
            }
            if mapping.reference_kind() == Some(ReferenceKind::ToOne)
                && mapping
                    .referenced_entity()
                    .and_then(EntityMetadata::object_id_mapping)
                    .is_none()
            {
                return Err(Error::Custom(format!(
                    "{}.{}: referenced entity has no object id",
                    self.class_name, mapping.class_property_name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EntityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("class_name", &self.class_name)
            .field("table_name", &self.table_name)
            .field("property_mappings", &self.property_mappings)
            .field("user_metadata", &self.user_metadata)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`EntityMetadata::builder`].
pub struct EntityMetadataBuilder {
    class_name: &'static str,
    table_name: Option<String>,
    type_id: TypeId,
    constructor: fn() -> Instance,
    property_mappings: Vec<PropertyMapping>,
    user_metadata: BTreeMap<String, String>,
}

impl EntityMetadataBuilder {
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn property(mut self, mapping: PropertyMapping) -> Self {
        self.property_mappings.push(mapping);
        self
    }

    pub fn user_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze the metadata.
    pub fn build(self) -> Result<EntityMetadata> {
        let table_name = self
            .table_name
            .unwrap_or_else(|| self.class_name.to_string());
        if table_name.is_empty() {
            return Err(Error::Custom(format!(
                "{}: table name must not be empty",
                self.class_name
            )));
        }

        let mut object_id = None;
        let mut columns = HashSet::new();
        for (index, mapping) in self.property_mappings.iter().enumerate() {
            if mapping.object_id {
                if object_id.is_some() {
                    return Err(Error::Custom(format!(
                        "{}: more than one object id mapping",
                        self.class_name
                    )));
                }
                if mapping.is_reference() || mapping.transient {
                    return Err(Error::Custom(format!(
                        "{}.{}: an object id must be a persisted value",
                        self.class_name, mapping.class_property_name
                    )));
                }
                object_id = Some(index);
            }
            if mapping.reference_kind() == Some(ReferenceKind::ToMany) {
                if mapping.table_field_name.is_some() || !mapping.transient {
                    return Err(Error::Custom(format!(
                        "{}.{}: a to-many reference must be transient with no column",
                        self.class_name, mapping.class_property_name
                    )));
                }
                continue;
            }
            if !mapping.transient && !columns.insert(mapping.field_name().to_string()) {
                return Err(Error::Custom(format!(
                    "{}: column '{}' is mapped twice",
                    self.class_name,
                    mapping.field_name()
                )));
            }
            if !is_valid_identifier(mapping.field_name()) {
                tracing::warn!(
                    class = self.class_name,
                    column = mapping.field_name(),
                    "Column name is not a plain identifier; its parameter name will be rewritten"
                );
            }
        }

        tracing::debug!(
            class = self.class_name,
            table = %table_name,
            properties = self.property_mappings.len(),
            "Registered entity metadata"
        );

        Ok(EntityMetadata {
            class_name: self.class_name,
            table_name,
            type_id: self.type_id,
            constructor: self.constructor,
            property_mappings: self.property_mappings,
            object_id,
            user_metadata: self.user_metadata,
        })
    }
}
