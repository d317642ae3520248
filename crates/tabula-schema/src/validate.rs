//! Live table shape versus entity metadata.
//!
//! The diff computed here decides whether an Update-mode table needs a rebuild,
//! which columns survive the copy, and what Validate mode reports.

use crate::ddl::DdlGenerator;
use std::collections::HashSet;
use std::fmt;
use tabula_core::{ColumnDescriptor, EntityMetadata, PropertyMapping};

/// Storage class a declared column type resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

/// Resolve the affinity of a declared type name.
///
/// The rules are SQLite's, applied in order: `INT`, then `CHAR`/`CLOB`/`TEXT`, then
/// `BLOB` or an empty declaration, then `REAL`/`FLOA`/`DOUB`, else numeric.
pub fn affinity(declared: &str) -> Affinity {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
        Affinity::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("BLOB") || upper.trim().is_empty() {
        Affinity::Blob
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Numeric
    }
}

/// Whether a column declared as `declared` can hold values of `mapping_type`.
///
/// `mapping_type` is the backend column type the generator would emit.
pub fn is_compatible(declared: &str, mapping_type: &str) -> bool {
    let live = affinity(declared);
    let wanted = affinity(mapping_type);
    live == wanted
        || (live == Affinity::Numeric && matches!(wanted, Affinity::Integer | Affinity::Real))
}

/// One difference between a live table and its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    MissingTable {
        table: String,
    },
    /// Live column with no mapping
    UnmappedColumn {
        column: String,
    },
    /// Live column whose mapping is transient
    TransientColumn {
        column: String,
        property: String,
    },
    IncompatibleType {
        column: String,
        declared: String,
        expected: String,
    },
    /// Persisted mapping with no live column
    MissingColumn {
        column: String,
        property: String,
    },
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMismatch::MissingTable { table } => write!(f, "table '{}' does not exist", table),
            SchemaMismatch::UnmappedColumn { column } => {
                write!(f, "column '{}' has no property mapping", column)
            }
            SchemaMismatch::TransientColumn { column, property } => write!(
                f,
                "column '{}' is mapped to transient property '{}'",
                column, property
            ),
            SchemaMismatch::IncompatibleType {
                column,
                declared,
                expected,
            } => write!(
                f,
                "column '{}' is declared {} but the mapping needs {}",
                column, declared, expected
            ),
            SchemaMismatch::MissingColumn { column, property } => write!(
                f,
                "column '{}' for property '{}' is missing",
                column, property
            ),
        }
    }
}

fn persisted(metadata: &EntityMetadata) -> impl Iterator<Item = &PropertyMapping> {
    metadata
        .property_mappings()
        .iter()
        .filter(|m| !m.is_transient() && m.table_field_name().is_some())
}

/// Diff the live `columns` of a table against `metadata`.
///
/// An empty result means the table matches. Callers report a missing table
/// themselves; `columns` always describes an existing table here.
pub fn validate_table<G: DdlGenerator + ?Sized>(
    generator: &G,
    metadata: &EntityMetadata,
    columns: &[ColumnDescriptor],
) -> Vec<SchemaMismatch> {
    let mut mismatches = Vec::new();
    for column in columns {
        match metadata.field(&column.name) {
            None => mismatches.push(SchemaMismatch::UnmappedColumn {
                column: column.name.clone(),
            }),
            Some(mapping) if mapping.is_transient() => {
                mismatches.push(SchemaMismatch::TransientColumn {
                    column: column.name.clone(),
                    property: mapping.class_property_name().to_string(),
                });
            }
            Some(mapping) => {
                let expected = generator.column_type(&mapping.data_type());
                if !is_compatible(&column.declared_type, &expected) {
                    mismatches.push(SchemaMismatch::IncompatibleType {
                        column: column.name.clone(),
                        declared: column.declared_type.clone(),
                        expected,
                    });
                }
            }
        }
    }
    mismatches.extend(missing_columns(metadata, columns).into_iter().map(|m| {
        SchemaMismatch::MissingColumn {
            column: m.field_name().to_string(),
            property: m.class_property_name().to_string(),
        }
    }));
    mismatches
}

/// Persisted mappings with no live column.
pub fn missing_columns<'a>(
    metadata: &'a EntityMetadata,
    columns: &[ColumnDescriptor],
) -> Vec<&'a PropertyMapping> {
    let live: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    persisted(metadata)
        .filter(|m| !live.contains(m.field_name()))
        .collect()
}

/// Columns that can be carried over when a table is rebuilt.
///
/// A column qualifies when it exists live and is mapped to a persisted property.
/// Its declared type does not matter: the rebuilt column's type coerces the copied
/// values.
pub fn copyable_columns(metadata: &EntityMetadata, columns: &[ColumnDescriptor]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| {
            metadata
                .field(&column.name)
                .is_some_and(|mapping| !mapping.is_transient())
        })
        .map(|column| column.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteDdlGenerator;
    use crate::fixtures::{Province, Town};
    use tabula_core::Entity;

    fn town_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", "INTEGER"),
            ColumnDescriptor::new("name", "TEXT"),
            ColumnDescriptor::new("province_id", "INTEGER"),
        ]
    }

    #[test]
    fn affinity_rules() {
        assert_eq!(affinity("INTEGER"), Affinity::Integer);
        assert_eq!(affinity("bigint"), Affinity::Integer);
        assert_eq!(affinity("VARCHAR(30)"), Affinity::Text);
        assert_eq!(affinity(""), Affinity::Blob);
        assert_eq!(affinity("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(affinity("NUMERIC"), Affinity::Numeric);
        assert_eq!(affinity("BOOLEAN"), Affinity::Numeric);
    }

    #[test]
    fn numeric_accepts_integer_and_real() {
        assert!(is_compatible("NUMERIC", "INTEGER"));
        assert!(is_compatible("DECIMAL(10,2)", "REAL"));
        assert!(!is_compatible("NUMERIC", "TEXT"));
        assert!(!is_compatible("INTEGER", "TEXT"));
        assert!(is_compatible("varchar(12)", "TEXT"));
    }

    #[test]
    fn matching_table_has_no_mismatches() {
        let diff = validate_table(&SqliteDdlGenerator, Town::metadata(), &town_columns());
        assert!(diff.is_empty(), "{:?}", diff);
    }

    #[test]
    fn reports_every_kind_of_difference() {
        let columns = vec![
            ColumnDescriptor::new("id", "INTEGER"),
            ColumnDescriptor::new("name", "BLOB"),
            ColumnDescriptor::new("mayor", "TEXT"),
        ];
        let diff = validate_table(&SqliteDdlGenerator, Town::metadata(), &columns);
        assert_eq!(diff.len(), 3);
        assert!(diff.contains(&SchemaMismatch::UnmappedColumn {
            column: "mayor".into()
        }));
        assert!(diff.contains(&SchemaMismatch::IncompatibleType {
            column: "name".into(),
            declared: "BLOB".into(),
            expected: "TEXT".into(),
        }));
        assert!(diff.contains(&SchemaMismatch::MissingColumn {
            column: "province_id".into(),
            property: "province".into(),
        }));
    }

    #[test]
    fn collections_never_count_as_missing() {
        let columns = vec![
            ColumnDescriptor::new("id", "INTEGER"),
            ColumnDescriptor::new("name", "TEXT"),
        ];
        assert!(missing_columns(Province::metadata(), &columns).is_empty());
        assert!(validate_table(&SqliteDdlGenerator, Province::metadata(), &columns).is_empty());
    }

    #[test]
    fn copy_list_skips_unmapped_but_keeps_retyped_columns() {
        let columns = vec![
            ColumnDescriptor::new("id", "INTEGER"),
            ColumnDescriptor::new("name", "BLOB"),
            ColumnDescriptor::new("mayor", "TEXT"),
            ColumnDescriptor::new("province_id", "INTEGER"),
        ];
        assert_eq!(
            copyable_columns(Town::metadata(), &columns),
            vec!["id".to_string(), "name".to_string(), "province_id".to_string()]
        );
    }

    #[test]
    fn copy_list_skips_collections() {
        let columns = vec![
            ColumnDescriptor::new("id", "INTEGER"),
            ColumnDescriptor::new("towns", "INTEGER"),
        ];
        assert_eq!(copyable_columns(Province::metadata(), &columns), vec!["id".to_string()]);
    }

    #[test]
    fn mismatch_messages() {
        let missing = SchemaMismatch::MissingTable {
            table: "town".into(),
        };
        assert_eq!(missing.to_string(), "table 'town' does not exist");
        let unmapped = SchemaMismatch::UnmappedColumn {
            column: "mayor".into(),
        };
        assert_eq!(unmapped.to_string(), "column 'mayor' has no property mapping");
    }
}
