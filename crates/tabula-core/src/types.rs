//! Property data types and their value-kind grouping.

/// Data type of a mapped property.
///
/// Backends map these onto concrete column types through their DDL dialect; the
/// grouping methods below drive that mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Boolean
    Boolean,

    // String types
    Char(u32),
    VarChar(u32),
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Time,
    DateTime,
    Timestamp,

    // JSON, stored as text where unsupported
    Json,

    // Custom type name
    Custom(&'static str),
}

impl SqlType {
    /// Get the generic SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::TinyInt => "TINYINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Char(len) => format!("CHAR({})", len),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::DateTime => "DATETIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    /// Integral value kinds, including the platform "long" custom kind.
    pub fn is_integral(&self) -> bool {
        match self {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => true,
            SqlType::Custom(name) => {
                name.eq_ignore_ascii_case("long") || name.eq_ignore_ascii_case("ulong")
            }
            _ => false,
        }
    }

    pub const fn is_floating(&self) -> bool {
        matches!(self, SqlType::Real | SqlType::Double)
    }

    pub const fn is_boolean(&self) -> bool {
        matches!(self, SqlType::Boolean)
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(
            self,
            SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text | SqlType::Json
        )
    }

    /// Check if this type is a date/time type.
    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date | SqlType::Time | SqlType::DateTime | SqlType::Timestamp
        )
    }
}

/// Trait for Rust types that have a natural property data type.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;
}

impl TypeInfo for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;
}

impl TypeInfo for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;
}

impl TypeInfo for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;
}

impl TypeInfo for f32 {
    const SQL_TYPE: SqlType = SqlType::Real;
}

impl TypeInfo for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;
}

impl TypeInfo for String {
    const SQL_TYPE: SqlType = SqlType::Text;
}

impl TypeInfo for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;
}

impl TypeInfo for serde_json::Value {
    const SQL_TYPE: SqlType = SqlType::Json;
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_custom_kind_is_integral() {
        assert!(SqlType::Custom("long").is_integral());
        assert!(SqlType::Custom("LONG").is_integral());
        assert!(!SqlType::Custom("money").is_integral());
    }

    #[test]
    fn option_inherits_inner_type() {
        assert_eq!(<Option<String> as TypeInfo>::SQL_TYPE, SqlType::Text);
        assert_eq!(<Option<i64> as TypeInfo>::SQL_TYPE, SqlType::BigInt);
    }

    #[test]
    fn groupings() {
        assert!(SqlType::Double.is_floating());
        assert!(SqlType::Timestamp.is_temporal());
        assert!(SqlType::VarChar(20).is_text());
        assert!(!SqlType::Blob.is_text());
    }
}
