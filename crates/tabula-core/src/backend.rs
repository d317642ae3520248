//! The blocking SQL backend consumed by the provider.

use crate::Result;
use crate::dialect::Dialect;
use crate::row::Row;
use crate::value::Value;
use std::collections::BTreeSet;

/// Named statement parameters, in binding order. Names carry no `:` prefix.
pub type Params = [(String, Value)];

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Identifier generated by the most recent insert, if the backend reports one
    pub last_insert_id: Option<Value>,
}

/// Live description of one table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Declared type as reported by the backend, e.g. `INTEGER`
    pub declared_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            primary_key: false,
        }
    }
}

/// A single exclusively-owned connection to a SQL database.
///
/// Every call blocks until the backend responds. Implementations bind parameters by
/// name, so statement text uses `:name` placeholders.
pub trait SqlBackend {
    /// The dialect statement text must be generated in.
    fn dialect(&self) -> Dialect;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Prepare, bind and run a statement that returns rows.
    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>>;

    /// Prepare, bind and run a statement that does not return rows.
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecuteOutcome>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Message of the most recent failure, if any.
    fn last_error(&self) -> Option<String>;

    /// Names of all user tables.
    fn tables(&mut self) -> Result<BTreeSet<String>>;

    /// Columns of `table`, in declaration order. Empty when the table does not exist.
    fn record(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    fn foreign_keys_enabled(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn set_foreign_keys_enabled(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    /// Report foreign-key violations across the database as an error.
    fn check_foreign_keys(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: SqlBackend + ?Sized> SqlBackend for Box<B> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecuteOutcome> {
        (**self).execute(sql, params)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn last_error(&self) -> Option<String> {
        (**self).last_error()
    }

    fn tables(&mut self) -> Result<BTreeSet<String>> {
        (**self).tables()
    }

    fn record(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        (**self).record(table)
    }

    fn foreign_keys_enabled(&mut self) -> Result<bool> {
        (**self).foreign_keys_enabled()
    }

    fn set_foreign_keys_enabled(&mut self, enabled: bool) -> Result<()> {
        (**self).set_foreign_keys_enabled(enabled)
    }

    fn check_foreign_keys(&mut self) -> Result<()> {
        (**self).check_foreign_keys()
    }
}
