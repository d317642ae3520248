//! Provider configuration.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a provider reconciles live tables with entity mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Drop and create every table. Destroys data.
    Recreate,
    /// Create missing tables and rebuild mismatched ones, keeping matching columns
    Update,
    /// Check compatibility only and fail on any mismatch
    Validate,
    /// Assume the schema is managed elsewhere
    #[default]
    Bypass,
    /// Create missing tables and add missing columns only
    Append,
}

impl SchemaMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            SchemaMode::Recreate => "recreate",
            SchemaMode::Update => "update",
            SchemaMode::Validate => "validate",
            SchemaMode::Bypass => "bypass",
            SchemaMode::Append => "append",
        }
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recreate" => Ok(SchemaMode::Recreate),
            "update" => Ok(SchemaMode::Update),
            "validate" => Ok(SchemaMode::Validate),
            "bypass" => Ok(SchemaMode::Bypass),
            "append" => Ok(SchemaMode::Append),
            other => Err(Error::Custom(format!("unknown schema mode '{}'", other))),
        }
    }
}

/// Connection and behavior settings for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfiguration {
    pub host_name: String,
    pub connect_options: String,
    /// Database name, or a file path for file-based backends
    pub database_name: String,
    pub user_name: String,
    pub password: String,
    /// Log every statement and its bound parameters
    pub verbose: bool,
    pub schema_mode: SchemaMode,
}

impl ProviderConfiguration {
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            ..Self::default()
        }
    }

    pub fn schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
