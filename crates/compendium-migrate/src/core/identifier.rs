//! SQL identifier validation and quoting.
//!
//! Table, column and view names cannot be bound as statement parameters, yet
//! the engine builds its DDL and merge views from a declared registry. Every
//! name that ends up in dynamic SQL passes through this module: it is
//! validated for suspicious content and wrapped in SQLite double quotes with
//! embedded quotes doubled.

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted in generated SQL.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Schema(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Schema(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Schema(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a SQLite identifier.
///
/// ```ignore
/// assert_eq!(quote("core_items")?, "\"core_items\"");
/// assert_eq!(quote("odd\"name")?, "\"odd\"\"name\"");
/// ```
pub fn quote(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a column reference qualified by a table alias, e.g. `core."name"`.
///
/// The alias is an internal constant, only the column is quoted.
pub fn qualified(alias: &str, column: &str) -> Result<String> {
    Ok(format!("{}.{}", alias, quote(column)?))
}

/// Quote a list of columns and join them with `", "`.
pub fn quote_list<S: AsRef<str>>(columns: &[S]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote(c.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Escape a value for use inside a single-quoted SQL string literal.
///
/// Only used for values that are part of a declaration (CHECK lists, column
/// defaults); row data is always bound.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("core_items").is_ok());
        assert!(validate_identifier("custom_mag_items_base").is_ok());
        assert!(validate_identifier("Rüstung").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("core\0items");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long_name = "t".repeat(MAX_IDENTIFIER_LENGTH + 1);
        let result = validate_identifier(&long_name);
        assert!(result.unwrap_err().to_string().contains("maximum length"));
        assert!(validate_identifier(&"t".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
    }

    #[test]
    fn test_quote_escapes_double_quote() {
        assert_eq!(quote("core_items").unwrap(), "\"core_items\"");
        assert_eq!(quote("odd\"name").unwrap(), "\"odd\"\"name\"");
    }

    #[test]
    fn test_quote_injection_safely_quoted() {
        assert_eq!(
            quote("x\"; DROP TABLE core_items;--").unwrap(),
            "\"x\"\"; DROP TABLE core_items;--\""
        );
    }

    #[test]
    fn test_qualified_and_list() {
        assert_eq!(qualified("core", "name").unwrap(), "core.\"name\"");
        assert_eq!(quote_list(&["id", "name"]).unwrap(), "\"id\", \"name\"");
    }

    #[test]
    fn test_string_literal_escapes_quote() {
        assert_eq!(string_literal("core_tools"), "'core_tools'");
        assert_eq!(string_literal("it's"), "'it''s'");
    }
}
