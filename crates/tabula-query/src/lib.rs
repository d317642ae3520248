//! Query model and SQL generation for Tabula.
//!
//! A [`Query`] names an operation, a relation, an optional filter tree and ordering.
//! [`StatementGenerator`] compiles it into statement text with named parameters.

pub mod clause;
pub mod filter;
pub mod generator;
pub mod query;

pub use clause::{Order, OrderDirection};
pub use filter::{Comparison, Filter, FilterValue, LogicalOp};
pub use generator::{BoundParameters, StatementGenerator, persisted_value};
pub use query::{Operation, Query, QueryFlags, Relation};
