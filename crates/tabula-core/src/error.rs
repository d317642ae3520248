//! Error types for Tabula operations.

use std::fmt;

/// The primary error type for all Tabula operations.
///
/// Every recoverable failure travels up through provider and session as a value of
/// this type. Conditions that leave the identity map provably inconsistent are not
/// represented here; those panic.
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-reported failure, message passed through verbatim
    Provider(ProviderError),
    /// A schema synchronization step failed or found a mismatch
    UnsynchronizedSchema(SchemaSyncError),
    /// A cached instance conflicts with the backend state
    UnsynchronizedEntity(EntityStateError),
    /// Commit or rollback requested with no open transaction
    TransactionNotActive,
    /// A value could not be converted to the requested type
    Type(TypeError),
    /// Anything else
    Custom(String),
}

/// Coarse classification of an [`Error`], also used for "no error" reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorKind {
    #[default]
    None,
    Provider,
    UnsynchronizedSchema,
    UnsynchronizedEntity,
    TransactionNotActive,
    Other,
}

#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
    /// Statement text that failed, when one was involved
    pub sql: Option<String>,
    /// Backend-specific result code
    pub code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SchemaSyncError {
    pub table: String,
    pub message: String,
    /// Individual column-level differences, one per entry
    pub mismatches: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EntityStateError {
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Provider(_) => ErrorKind::Provider,
            Error::UnsynchronizedSchema(_) => ErrorKind::UnsynchronizedSchema,
            Error::UnsynchronizedEntity(_) => ErrorKind::UnsynchronizedEntity,
            Error::TransactionNotActive => ErrorKind::TransactionNotActive,
            Error::Type(_) | Error::Custom(_) => ErrorKind::Other,
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Error::Provider(ProviderError {
            message: message.into(),
            sql: None,
            code: None,
        })
    }

    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnsynchronizedSchema(SchemaSyncError {
            table: table.into(),
            message: message.into(),
            mismatches: Vec::new(),
        })
    }

    pub fn entity(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnsynchronizedEntity(EntityStateError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// The human-readable message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Provider(e) => e.message.clone(),
            Error::UnsynchronizedSchema(e) => e.message.clone(),
            Error::UnsynchronizedEntity(e) => e.message.clone(),
            Error::TransactionNotActive => "Transaction is not active".to_string(),
            Error::Type(e) => e.to_string(),
            Error::Custom(msg) => msg.clone(),
        }
    }

    /// Attach the failing statement to a provider error. Other kinds pass through.
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Provider(mut e) => {
                if e.sql.is_none() {
                    e.sql = Some(sql.to_string());
                }
                Error::Provider(e)
            }
            other => other,
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} in column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Provider(e) => match &e.sql {
                Some(sql) => write!(f, "Provider error: {} (while executing: {})", e.message, sql),
                None => write!(f, "Provider error: {}", e.message),
            },
            Error::UnsynchronizedSchema(e) => {
                write!(f, "Unsynchronized schema for '{}': {}", e.table, e.message)?;
                for mismatch in &e.mismatches {
                    write!(f, "\n  - {}", mismatch)?;
                }
                Ok(())
            }
            Error::UnsynchronizedEntity(e) => {
                write!(f, "Unsynchronized entity {}: {}", e.entity, e.message)
            }
            Error::TransactionNotActive => write!(f, "Transaction is not active"),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for Tabula operations.
pub type Result<T> = std::result::Result<T, Error>;
