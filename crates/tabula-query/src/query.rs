//! The declarative query model.

use crate::clause::Order;
use crate::filter::Filter;
use std::ops::BitOr;
use std::sync::Arc;
use tabula_core::{EntityMetadata, Instance};

/// What a query does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    /// Create-or-update; only meaningful at the session level
    Merge,
}

/// Source of a query: an entity table or a nested query.
#[derive(Debug, Clone)]
pub enum Relation {
    Entity(&'static EntityMetadata),
    Query(Arc<Query>),
}

impl Relation {
    /// The entity behind this relation, looking through subqueries.
    pub fn entity(&self) -> &'static EntityMetadata {
        match self {
            Relation::Entity(metadata) => metadata,
            Relation::Query(query) => query.relation().entity(),
        }
    }
}

/// Behavior switches for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const NONE: QueryFlags = QueryFlags(0);
    /// Refresh cached instances in place even when they have unsaved changes
    pub const OVERWRITE_CACHED_INSTANCES: QueryFlags = QueryFlags(1);

    pub const fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: QueryFlags) -> QueryFlags {
        QueryFlags(self.0 | rhs.0)
    }
}

/// An immutable query value. Nested queries are shared through `Arc`.
#[derive(Debug, Clone)]
pub struct Query {
    operation: Operation,
    relation: Relation,
    projection: Option<&'static EntityMetadata>,
    filter: Option<Filter>,
    order: Vec<Order>,
    flags: QueryFlags,
    entity_instance: Option<Instance>,
}

impl Query {
    pub fn new(operation: Operation, relation: Relation) -> Self {
        Self {
            operation,
            relation,
            projection: None,
            filter: None,
            order: Vec::new(),
            flags: QueryFlags::NONE,
            entity_instance: None,
        }
    }

    /// Read all instances of `metadata`.
    pub fn read(metadata: &'static EntityMetadata) -> Self {
        Self::new(Operation::Read, Relation::Entity(metadata)).with_projection(metadata)
    }

    /// Read from the result of `inner`, projecting onto its entity.
    pub fn read_from(inner: Query) -> Self {
        let projection = inner.projection.unwrap_or_else(|| inner.relation.entity());
        Self::new(Operation::Read, Relation::Query(Arc::new(inner))).with_projection(projection)
    }

    fn for_instance(operation: Operation, instance: Instance) -> Self {
        let metadata = instance.metadata();
        Self::new(operation, Relation::Entity(metadata))
            .with_projection(metadata)
            .with_instance(instance)
    }

    pub fn create(instance: Instance) -> Self {
        Self::for_instance(Operation::Create, instance)
    }

    pub fn update(instance: Instance) -> Self {
        Self::for_instance(Operation::Update, instance)
    }

    pub fn merge(instance: Instance) -> Self {
        Self::for_instance(Operation::Merge, instance)
    }

    /// Delete one instance by its object id.
    pub fn delete(instance: Instance) -> Self {
        Self::for_instance(Operation::Delete, instance)
    }

    /// Delete every row of `metadata` matching `filter`.
    pub fn delete_where(metadata: &'static EntityMetadata, filter: Filter) -> Self {
        Self::new(Operation::Delete, Relation::Entity(metadata)).with_filter(filter)
    }

    pub fn with_projection(mut self, projection: &'static EntityMetadata) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.entity_instance = Some(instance);
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    pub fn projection(&self) -> Option<&'static EntityMetadata> {
        self.projection
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn order(&self) -> &[Order] {
        &self.order
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn entity_instance(&self) -> Option<&Instance> {
        self.entity_instance.as_ref()
    }
}
