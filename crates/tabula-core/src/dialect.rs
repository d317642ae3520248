//! SQL dialects understood by statement and DDL generation.

use crate::identifiers::quote_ident;

/// Backend SQL dialect.
///
/// Session and cache logic is shared; only statement text and DDL differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// SQLite
    #[default]
    Sqlite,
    /// PostgreSQL
    Postgres,
}

impl Dialect {
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Quote a table or column name. Both dialects use ANSI double quotes.
    pub fn quote_identifier(self, name: &str) -> String {
        quote_ident(name)
    }

    /// Named parameter placeholder as it appears in statement text.
    pub fn placeholder(self, name: &str) -> String {
        format!(":{}", name)
    }

    /// Whether an autogenerated key must be requested with `RETURNING`.
    pub const fn returns_generated_keys(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}
