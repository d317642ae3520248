//! Tabula - an identity-mapped ORM runtime with schema synchronization.
//!
//! Tabula maps plain Rust structs to tables through runtime metadata and provides:
//!
//! - An identity map: one live instance per row, with dirty tracking
//! - Cycle-safe hydration of to-one references and to-many collections
//! - Merge (insert or update) and remove, with referenced instances saved first
//! - Schema synchronization modes: Recreate, Update, Validate, Append, Bypass
//! - Nested transactions whose rollback re-reads every instance written inside them
//!
//! # Quick Start
//!
//! ```ignore
//! use tabula::prelude::*;
//!
//! #[derive(Default)]
//! struct Hero {
//!     id: i64,
//!     name: String,
//! }
//!
//! static HERO: LazyLock<EntityMetadata> = LazyLock::new(|| {
//!     EntityMetadata::builder::<Hero>("Hero")
//!         .property(PropertyMapping::column("id", |h: &Hero| h.id, |h: &mut Hero, v| h.id = v)
//!             .object_id()
//!             .autogenerated())
//!         .property(PropertyMapping::column("name", |h: &Hero| h.name.clone(), |h: &mut Hero, v| h.name = v))
//!         .build()
//!         .unwrap()
//! });
//!
//! impl Entity for Hero {
//!     fn metadata() -> &'static EntityMetadata {
//!         &HERO
//!     }
//! }
//!
//! let mut session = sqlite_session(
//!     ProviderConfiguration::new("heroes.db").schema_mode(SchemaMode::Update),
//! );
//! let hero = entity(Hero { name: "Spider-Man".into(), ..Default::default() });
//! session.merge(&hero)?;
//!
//! let again = session.read_by_id::<Hero>(hero.read().id)?.unwrap();
//! assert!(Arc::ptr_eq(&again, &hero));
//! ```

pub use tabula_core::{
    ColumnDescriptor, Dialect, Entity, EntityMetadata, EntityMetadataBuilder, EntityRef, Error,
    ErrorKind, ExecuteOutcome, Instance, InstanceId, PropertyMapping, PropertyValue,
    ProviderConfiguration, ReferenceKind, Result, Row, SCHEMA_MODE_KEY, SchemaMode, SqlBackend,
    SqlType, TypeInfo, Value, entity,
};

pub use tabula_query::{
    Comparison, Filter, FilterValue, LogicalOp, Operation, Order, OrderDirection, Query,
    QueryFlags, Relation, StatementGenerator,
};

pub use tabula_schema::{DdlGenerator, SchemaMismatch, generator_for_dialect};

pub use tabula_session::{
    EntityInstanceCache, Provider, QueryOutput, Session, TrackedInstance, TrackedOperation,
    TransactionAction, TransactionPropagation, TransactionToken,
};

pub use tabula_sqlite::{SqliteBackend, SqliteConfig};

/// Session over a SQLite database named by `configuration.database_name`.
///
/// An empty database name opens a private in-memory database.
pub fn sqlite_session(configuration: ProviderConfiguration) -> Session<SqliteBackend> {
    let backend = SqliteBackend::new(SqliteConfig::from_configuration(&configuration));
    tracing::debug!(
        database = %configuration.database_name,
        mode = %configuration.schema_mode,
        "Creating SQLite session"
    );
    Session::with_backend(backend, configuration)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Entity, EntityMetadata, EntityRef, Error, ErrorKind, Filter, Instance, PropertyMapping,
        ProviderConfiguration, Query, QueryFlags, Result, SchemaMode, Session, SqliteBackend,
        TransactionAction, TransactionPropagation, Value, entity, sqlite_session,
    };
    pub use std::sync::{Arc, LazyLock};
}
