//! SQL identifier quoting and validation.

use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("non-word pattern is valid"));

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
///
/// ```
/// use tabula_core::quote_ident;
///
/// assert_eq!(quote_ident("town"), "\"town\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether `name` is a plain identifier usable unquoted and as a parameter name.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Derive a bindable parameter name from a column name.
///
/// Characters outside `[A-Za-z0-9_]` become underscores so the result is always a
/// valid `:name` placeholder.
pub fn parameter_name(column: &str) -> String {
    let cleaned = NON_WORD.replace_all(column, "_");
    if cleaned.is_empty() {
        "p".to_string()
    } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("p{}", cleaned)
    } else {
        cleaned.into_owned()
    }
}
