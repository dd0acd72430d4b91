//! Error types for the compendium migration library.

use thiserror::Error;

/// Main error type for migration operations.
///
/// Only structural failures surface as `MigrateError`. Problems with a single
/// legacy row or collection element are recovered locally and reported as
/// [`crate::normalize::Diagnostic`] values instead.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage engine error (connection, statement, constraint outside row scope)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema declaration error (unknown category, invalid identifier, ...)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Write refused because it would break an override invariant
    #[error("Conflict on {table}: {message}")]
    Conflict { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Conflict error
    pub fn conflict(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Conflict {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an error for a category name the registry does not declare
    pub fn unknown_category(name: &str) -> Self {
        MigrateError::Schema(format!("unknown category '{}'", name))
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
