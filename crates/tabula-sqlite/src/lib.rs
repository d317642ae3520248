//! SQLite backend for Tabula.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate implements [`tabula_core::SqlBackend`] on top of libsqlite3 (bundled
//! through `libsqlite3-sys`), so a session provider can drive a file or in-memory
//! database.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabula_sqlite::SqliteBackend;
//! use tabula_core::SqlBackend;
//!
//! let mut backend = SqliteBackend::memory();
//! backend.open()?;
//! backend.execute_raw("CREATE TABLE towns (id INTEGER PRIMARY KEY, name TEXT)")?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool`, integers | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Date`, `Time`, `Timestamp` | TEXT (ISO-8601) |
//! | `Json` | TEXT |
//!
//! Integers always come back as `BigInt` and reals as `Double`.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteBackend, SqliteConfig};

/// Version string of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static NUL-terminated string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}
