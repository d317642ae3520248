//! SQLite connection implementing [`SqlBackend`].
//!
//! This module wraps SQLite's C API. Statements bind parameters by name, so the
//! `:name` placeholders produced by the statement and DDL generators are resolved
//! with `sqlite3_bind_parameter_index`.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::types;
/// `libsqlite3-sys` does not generate a binding for `sqlite3_close_v2`, so it
/// is declared here against the linked SQLite library.
mod ffi {
    pub use libsqlite3_sys::*;

    unsafe extern "C" {
        pub fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
    }
}
use std::collections::BTreeSet;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Arc;
use tabula_core::{
    ColumnDescriptor, ColumnInfo, Dialect, Error, ExecuteOutcome, Params, ProviderConfiguration,
    ProviderError, Result, Row, SqlBackend, Value, quote_ident,
};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read_only: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read_only: false,
            create: true,
            uri: false,
        }
    }
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            create: false,
            uri: false,
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = if self.read_only {
            ffi::SQLITE_OPEN_READONLY
        } else {
            ffi::SQLITE_OPEN_READWRITE
        };
        if self.create && !self.read_only {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::default(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File named by the provider configuration's database name. An empty name
    /// opens an in-memory database.
    pub fn from_configuration(configuration: &ProviderConfiguration) -> Self {
        if configuration.database_name.is_empty() {
            Self::memory()
        } else {
            Self::file(configuration.database_name.clone())
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// An exclusively owned connection to a SQLite database.
///
/// The database is opened by [`SqlBackend::open`] and closed by
/// [`SqlBackend::close`] or on drop.
pub struct SqliteBackend {
    config: SqliteConfig,
    db: *mut ffi::sqlite3,
    last_error: Option<String>,
}

// SAFETY: the handle is owned by exactly one backend and every call takes `&mut self`
// or reads only the pointer value, so it is never used from two threads at once.
unsafe impl Send for SqliteBackend {}

impl SqliteBackend {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            db: ptr::null_mut(),
            last_error: None,
        }
    }

    /// Backend for a fresh in-memory database.
    pub fn memory() -> Self {
        Self::new(SqliteConfig::memory())
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SqliteConfig::file(path))
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    fn handle(&self) -> Result<*mut ffi::sqlite3> {
        if self.db.is_null() {
            Err(Error::provider(format!(
                "database '{}' is not open",
                self.config.path
            )))
        } else {
            Ok(self.db)
        }
    }

    fn remember<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.last_error = Some(e.message());
        }
        result
    }

    /// Execute SQL directly without preparing or binding.
    pub fn execute_raw(&mut self, sql: &str) -> Result<()> {
        let result = self.execute_raw_inner(sql);
        self.remember(result)
    }

    fn execute_raw_inner(&self, sql: &str) -> Result<()> {
        let db = self.handle()?;
        let c_sql = CString::new(sql).map_err(|_| nul_error(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid for the duration of the call
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };

        if rc != ffi::SQLITE_OK {
            let message = if errmsg.is_null() {
                error_string(rc)
            } else {
                // SAFETY: errmsg was allocated by sqlite3_exec and is freed exactly once
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            return Err(sqlite_error(message, rc, sql));
        }
        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let db = self.handle()?;
        // SAFETY: db is open
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> Result<u64> {
        let db = self.handle()?;
        // SAFETY: db is open
        Ok(unsafe { ffi::sqlite3_changes(db) }.max(0) as u64)
    }

    fn query_inner(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let db = self.handle()?;
        let stmt = Statement::prepare(db, sql)?;
        stmt.bind(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let mut col_names = Vec::with_capacity(col_count.max(0) as usize);
        for i in 0..col_count {
            // SAFETY: stmt is valid and i is in range
            let name = unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i));
            col_names.push(name);
        }
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        while stmt.step()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..col_count {
                // SAFETY: stmt is valid and just returned SQLITE_ROW
                values.push(unsafe { types::read_column(stmt.raw, i) });
            }
            rows.push(Row::with_columns(Arc::clone(&columns), values));
        }
        Ok(rows)
    }

    fn execute_inner(&self, sql: &str, params: &Params) -> Result<ExecuteOutcome> {
        let db = self.handle()?;
        let stmt = Statement::prepare(db, sql)?;
        stmt.bind(params)?;
        while stmt.step()? {}
        drop(stmt);

        let rows_affected = self.changes()?;
        let last_insert_id = if is_insert(sql) && rows_affected > 0 {
            Some(Value::BigInt(self.last_insert_rowid()?))
        } else {
            None
        };
        Ok(ExecuteOutcome {
            rows_affected,
            last_insert_id,
        })
    }

    fn pragma_value(&mut self, pragma: &str) -> Result<Option<Value>> {
        let rows = self.query(pragma, &[])?;
        Ok(rows.first().and_then(|row| row.get(0)).cloned())
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is open and not used afterwards
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
            self.db = ptr::null_mut();
        }
    }
}

impl SqlBackend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn open(&mut self) -> Result<()> {
        if !self.db.is_null() {
            return Ok(());
        }
        let c_path = CString::new(self.config.path.as_str())
            .map_err(|_| Error::provider("Invalid path: contains null byte"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = self.config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                error_string(rc)
            } else {
                // SAFETY: db is valid until closed here
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            let error = Error::Provider(ProviderError {
                message: format!("Failed to open database: {}", msg),
                sql: None,
                code: Some(rc),
            });
            return self.remember(Err(error));
        }

        if self.config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, self.config.busy_timeout_ms as c_int);
            }
        }
        self.db = db;
        tracing::debug!(path = %self.config.path, "Opened SQLite database");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is open and not used afterwards
        let rc = unsafe { ffi::sqlite3_close_v2(self.db) };
        self.db = ptr::null_mut();
        if rc != ffi::SQLITE_OK {
            let error = sqlite_error(error_string(rc), rc, "");
            return self.remember(Err(error));
        }
        tracing::debug!(path = %self.config.path, "Closed SQLite database");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.db.is_null()
    }

    fn query(&mut self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let result = self.query_inner(sql, params);
        self.remember(result)
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecuteOutcome> {
        let result = self.execute_inner(sql, params);
        self.remember(result)
    }

    fn begin(&mut self) -> Result<()> {
        self.execute_raw("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.execute_raw("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute_raw("ROLLBACK")
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn tables(&mut self) -> Result<BTreeSet<String>> {
        let rows = self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| match row.get(0) {
                Some(Value::Text(name)) => Some(name.clone()),
                _ => None,
            })
            .collect())
    }

    fn record(&mut self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = self.query(&format!("PRAGMA table_info({})", quote_ident(table)), &[])?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let text = |name: &str| match row.get_by_name(name) {
                Some(Value::Text(s)) => s.clone(),
                _ => String::new(),
            };
            let flag = |name: &str| matches!(row.get_by_name(name), Some(Value::BigInt(v)) if *v != 0);
            columns.push(ColumnDescriptor {
                name: text("name"),
                declared_type: text("type"),
                nullable: !flag("notnull"),
                primary_key: flag("pk"),
            });
        }
        Ok(columns)
    }

    fn foreign_keys_enabled(&mut self) -> Result<bool> {
        Ok(matches!(
            self.pragma_value("PRAGMA foreign_keys")?,
            Some(Value::BigInt(v)) if v != 0
        ))
    }

    fn set_foreign_keys_enabled(&mut self, enabled: bool) -> Result<()> {
        self.execute_raw(if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        })
    }

    fn check_foreign_keys(&mut self) -> Result<()> {
        let violations = self.query("PRAGMA foreign_key_check", &[])?;
        if violations.is_empty() {
            return Ok(());
        }
        let tables: BTreeSet<String> = violations
            .iter()
            .filter_map(|row| match row.get(0) {
                Some(Value::Text(t)) => Some(t.clone()),
                _ => None,
            })
            .collect();
        let error = Error::provider(format!(
            "foreign key constraint violated in {} row(s) of: {}",
            violations.len(),
            tables.into_iter().collect::<Vec<_>>().join(", ")
        ));
        self.remember(Err(error))
    }
}

/// A prepared statement, finalized on drop.
struct Statement<'a> {
    db: *mut ffi::sqlite3,
    raw: *mut ffi::sqlite3_stmt,
    sql: &'a str,
}

impl<'a> Statement<'a> {
    fn prepare(db: *mut ffi::sqlite3, sql: &'a str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| nul_error(sql))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(db_error(db, sql));
        }
        Ok(Self { db, raw, sql })
    }

    /// Bind each named parameter to its `:name` placeholder. Parameters the
    /// statement does not mention are skipped.
    fn bind(&self, params: &Params) -> Result<()> {
        for (name, value) in params {
            let placeholder = CString::new(format!(":{}", name)).map_err(|_| nul_error(self.sql))?;
            // SAFETY: stmt is valid and placeholder is NUL-terminated
            let index = unsafe { ffi::sqlite3_bind_parameter_index(self.raw, placeholder.as_ptr()) };
            if index == 0 {
                tracing::trace!(parameter = %name, "Statement has no such parameter");
                continue;
            }
            // SAFETY: stmt is valid and index came from SQLite
            let rc = unsafe { types::bind_value(self.raw, index, value) };
            if rc != ffi::SQLITE_OK {
                let error = db_error(self.db, self.sql);
                return Err(Error::Provider(ProviderError {
                    message: format!("Failed to bind parameter {}: {}", name, error.message()),
                    sql: Some(self.sql.to_string()),
                    code: Some(rc),
                }));
            }
        }
        Ok(())
    }

    /// Advance one row. `Ok(false)` once the statement is done.
    fn step(&self) -> Result<bool> {
        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(self.raw) } {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            _ => Err(db_error(self.db, self.sql)),
        }
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // SAFETY: stmt is valid and finalized exactly once
        unsafe { ffi::sqlite3_finalize(self.raw) };
    }
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"))
}

fn error_string(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

fn sqlite_error(message: String, code: c_int, sql: &str) -> Error {
    Error::Provider(ProviderError {
        message,
        sql: (!sql.is_empty()).then(|| sql.to_string()),
        code: Some(code),
    })
}

fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe {
        let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (msg, ffi::sqlite3_extended_errcode(db))
    };
    sqlite_error(message, code, sql)
}

fn nul_error(sql: &str) -> Error {
    Error::Provider(ProviderError {
        message: "SQL contains null byte".to_string(),
        sql: Some(sql.to_string()),
        code: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::ErrorKind;

    fn open_memory() -> SqliteBackend {
        let mut backend = SqliteBackend::memory();
        backend.open().unwrap();
        backend
    }

    fn params(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn open_and_close() {
        let mut backend = SqliteBackend::memory();
        assert!(!backend.is_open());
        backend.open().unwrap();
        assert!(backend.is_open());
        backend.close().unwrap();
        assert!(!backend.is_open());
        assert_eq!(backend.query("SELECT 1", &[]).unwrap_err().kind(), ErrorKind::Provider);
    }

    #[test]
    fn execute_binds_by_name_and_reports_rowid() {
        let mut backend = open_memory();
        backend
            .execute_raw("CREATE TABLE \"Town\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT)")
            .unwrap();
        let outcome = backend
            .execute(
                "INSERT INTO \"Town\"(\"name\") VALUES(:name)",
                &params(&[("name", Value::Text("Arendal".into()))]),
            )
            .unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_id, Some(Value::BigInt(1)));

        let rows = backend
            .query(
                "SELECT \"id\",\"name\" FROM \"Town\" WHERE \"name\" = :name",
                &params(&[("name", Value::Text("Arendal".into()))]),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("Arendal".into())));
    }

    #[test]
    fn update_reports_changes_without_rowid() {
        let mut backend = open_memory();
        backend.execute_raw("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        backend.execute_raw("INSERT INTO t VALUES(1,'a'),(2,'b')").unwrap();
        let outcome = backend
            .execute("UPDATE t SET v = :v", &params(&[("v", Value::Text("c".into()))]))
            .unwrap();
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(outcome.last_insert_id, None);
    }

    #[test]
    fn failing_statement_keeps_sql_and_last_error() {
        let mut backend = open_memory();
        let err = backend.execute("INSERT INTO missing VALUES(1)", &[]).unwrap_err();
        match &err {
            Error::Provider(e) => {
                assert!(e.message.contains("no such table"));
                assert_eq!(e.sql.as_deref(), Some("INSERT INTO missing VALUES(1)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(backend.last_error().unwrap().contains("no such table"));
    }

    #[test]
    fn transactions_commit_and_roll_back() {
        let mut backend = open_memory();
        backend.execute_raw("CREATE TABLE t(v INTEGER)").unwrap();
        backend.begin().unwrap();
        backend.execute_raw("INSERT INTO t VALUES(1)").unwrap();
        backend.rollback().unwrap();
        backend.begin().unwrap();
        backend.execute_raw("INSERT INTO t VALUES(2)").unwrap();
        backend.commit().unwrap();
        let rows = backend.query("SELECT v FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&Value::BigInt(2)));
    }

    #[test]
    fn introspects_tables_and_columns() {
        let mut backend = open_memory();
        backend
            .execute_raw("CREATE TABLE \"Province\"(\"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\"name\" TEXT NOT NULL)")
            .unwrap();
        let tables = backend.tables().unwrap();
        assert!(tables.contains("Province"));
        assert!(!tables.iter().any(|t| t.starts_with("sqlite_")));

        let columns = backend.record("Province").unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].declared_type, "INTEGER");
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].name, "name");
        assert!(!columns[1].nullable);
        assert!(backend.record("Nowhere").unwrap().is_empty());
    }

    #[test]
    fn foreign_key_toggle_and_check() {
        let mut backend = open_memory();
        backend.set_foreign_keys_enabled(true).unwrap();
        assert!(backend.foreign_keys_enabled().unwrap());
        backend
            .execute_raw(
                "CREATE TABLE p(id INTEGER PRIMARY KEY); \
                 CREATE TABLE c(id INTEGER PRIMARY KEY, p_id INTEGER REFERENCES p(id));",
            )
            .unwrap();
        backend.set_foreign_keys_enabled(false).unwrap();
        assert!(!backend.foreign_keys_enabled().unwrap());
        backend.execute_raw("INSERT INTO c VALUES(1, 42)").unwrap();
        let err = backend.check_foreign_keys().unwrap_err();
        assert!(err.message().contains("c"));
    }

    #[test]
    fn round_trips_stored_values() {
        let mut backend = open_memory();
        backend.execute_raw("CREATE TABLE v(a, b, c, d, e)").unwrap();
        backend
            .execute(
                "INSERT INTO v VALUES(:a,:b,:c,:d,:e)",
                &params(&[
                    ("a", Value::Bool(true)),
                    ("b", Value::Double(2.5)),
                    ("c", Value::Bytes(vec![1, 2, 3])),
                    ("d", Value::Date(0)),
                    ("e", Value::Null),
                ]),
            )
            .unwrap();
        let rows = backend.query("SELECT * FROM v", &[]).unwrap();
        let row = &rows[0];
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
        assert_eq!(row.get(1), Some(&Value::Double(2.5)));
        assert_eq!(row.get(2), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(row.get(3), Some(&Value::Text("1970-01-01".into())));
        assert_eq!(row.get(4), Some(&Value::Null));
    }

    #[test]
    fn unused_parameters_are_ignored() {
        let mut backend = open_memory();
        let rows = backend
            .query("SELECT :a AS a", &params(&[("a", Value::Int(7)), ("b", Value::Int(8))]))
            .unwrap();
        assert_eq!(rows[0].get_by_name("a"), Some(&Value::BigInt(7)));
    }

    #[test]
    fn config_from_provider_configuration() {
        let config = SqliteConfig::from_configuration(&ProviderConfiguration::new("towns.db"));
        assert_eq!(config.path, "towns.db");
        let config = SqliteConfig::from_configuration(&ProviderConfiguration::default());
        assert_eq!(config.path, ":memory:");
    }
}
