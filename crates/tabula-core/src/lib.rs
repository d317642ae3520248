//! Core types and traits for Tabula.
//!
//! This crate provides the foundations the rest of the workspace builds on:
//!
//! - `Value` and `SqlType` for dynamically typed column data
//! - `EntityMetadata` / `PropertyMapping` describing how entities map to tables
//! - `Instance` / `EntityRef` handles to live entity objects
//! - `SqlBackend`, the blocking connection interface the provider drives
//! - `Error` / `ErrorKind` shared by every layer

pub mod backend;
pub mod config;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod metadata;
pub mod row;
pub mod types;
pub mod value;

pub use backend::{ColumnDescriptor, ExecuteOutcome, Params, SqlBackend};
pub use config::{ProviderConfiguration, SchemaMode};
pub use dialect::Dialect;
pub use entity::{Entity, EntityRef, Instance, InstanceId, entity};
pub use error::{
    EntityStateError, Error, ErrorKind, ProviderError, Result, SchemaSyncError, TypeError,
};
pub use identifiers::{is_valid_identifier, parameter_name, quote_ident};
pub use metadata::{
    EntityMetadata, EntityMetadataBuilder, PropertyMapping, PropertyValue, ReferenceKind,
    SCHEMA_MODE_KEY,
};
pub use row::{ColumnInfo, Row};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
